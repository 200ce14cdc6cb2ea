//! Column descriptors for binary table columns.
//!
//! A descriptor is parsed once per column at table-open time and is
//! immutable for the table's lifetime. Everything the codec layers decide
//! (decode strategy, on-disk width, header keyword values) derives from it.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// The element data type of a binary table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// `L` -- logical, one byte holding `T`/`F`.
    Logical,
    /// `X` -- bit array, 8 bits per byte, most significant first.
    Bit,
    /// `B` -- unsigned byte.
    Byte,
    /// `I` -- 16-bit signed integer.
    Short,
    /// `J` -- 32-bit signed integer.
    Int,
    /// `K` -- 64-bit signed integer.
    Long,
    /// `E` -- 32-bit IEEE float.
    Float,
    /// `D` -- 64-bit IEEE float.
    Double,
    /// `C` -- pair of 32-bit IEEE floats (real, imaginary).
    ComplexFloat,
    /// `M` -- pair of 64-bit IEEE floats (real, imaginary).
    ComplexDouble,
    /// `A` -- ASCII character.
    Ascii,
}

impl ScalarType {
    /// The TFORM type character.
    pub fn type_char(&self) -> char {
        match self {
            ScalarType::Logical => 'L',
            ScalarType::Bit => 'X',
            ScalarType::Byte => 'B',
            ScalarType::Short => 'I',
            ScalarType::Int => 'J',
            ScalarType::Long => 'K',
            ScalarType::Float => 'E',
            ScalarType::Double => 'D',
            ScalarType::ComplexFloat => 'C',
            ScalarType::ComplexDouble => 'M',
            ScalarType::Ascii => 'A',
        }
    }

    fn from_type_char(c: u8) -> Option<ScalarType> {
        Some(match c {
            b'L' => ScalarType::Logical,
            b'X' => ScalarType::Bit,
            b'B' => ScalarType::Byte,
            b'I' => ScalarType::Short,
            b'J' => ScalarType::Int,
            b'K' => ScalarType::Long,
            b'E' => ScalarType::Float,
            b'D' => ScalarType::Double,
            b'C' => ScalarType::ComplexFloat,
            b'M' => ScalarType::ComplexDouble,
            b'A' => ScalarType::Ascii,
            _ => return None,
        })
    }

    /// Bytes per single element. `Bit` returns 0; bit columns use
    /// `ceil(repeat / 8)` for the whole cell instead.
    pub fn byte_size(&self) -> usize {
        match self {
            ScalarType::Logical => 1,
            ScalarType::Bit => 0,
            ScalarType::Byte => 1,
            ScalarType::Short => 2,
            ScalarType::Int => 4,
            ScalarType::Long => 8,
            ScalarType::Float => 4,
            ScalarType::Double => 8,
            ScalarType::ComplexFloat => 8,
            ScalarType::ComplexDouble => 16,
            ScalarType::Ascii => 1,
        }
    }

    /// True for the types a null sentinel (TNULLn) may be declared on.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarType::Byte | ScalarType::Short | ScalarType::Int | ScalarType::Long
        )
    }

    /// The raw on-disk value range of an integer type, for sentinel
    /// selection and encode range checks. `None` for non-integer types.
    pub fn raw_range(&self) -> Option<(i64, i64)> {
        match self {
            ScalarType::Byte => Some((0, 255)),
            ScalarType::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            ScalarType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            ScalarType::Long => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

/// How a column's elements are stored in the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Elements live in the fixed-width row slot.
    Fixed(ScalarType),
    /// `P` -- the slot holds a 32-bit (count, heap offset) descriptor.
    VarP(ScalarType),
    /// `Q` -- the slot holds a 64-bit (count, heap offset) descriptor.
    VarQ(ScalarType),
}

impl ColumnType {
    /// The element type, for fixed and heap-indirected columns alike.
    pub fn element(&self) -> ScalarType {
        match self {
            ColumnType::Fixed(t) | ColumnType::VarP(t) | ColumnType::VarQ(t) => *t,
        }
    }

    /// True for heap-indirected (`P`/`Q`) columns.
    pub fn is_variable(&self) -> bool {
        !matches!(self, ColumnType::Fixed(_))
    }
}

/// The scale/zero treatment a column declares, classified once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scaling {
    /// `scale == 1`, `zero == 0`: raw values pass through.
    Identity,
    /// Both factors are exact integers: values widen losslessly.
    Integer { scale: i64, zero: i64 },
    /// Anything else: values promote to floating point.
    Real { scale: f64, zero: f64 },
}

/// `TZERO` value that marks a `K` column as unsigned 64-bit.
pub const TZERO_U64: f64 = 9_223_372_036_854_775_808.0;

fn exact_i64(v: f64) -> Option<i64> {
    // Strict upper bound: 2^63 itself is the unsigned-long marker and is
    // classified before this runs.
    if v.is_finite() && libm::floor(v) == v && v >= -TZERO_U64 && v < TZERO_U64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Describes one column of a binary table.
///
/// `scale` defaults to 1 and `zero` to 0 (the identity transform). `blank`
/// is the raw on-disk null sentinel from TNULLn. `shape` is the declared
/// TDIMn array shape; for heap-indirected columns it is apparent only (the
/// live element count is read per row). `heap_offset` is the byte offset of
/// the heap area from the start of the data region (THEAP).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Column name (from TTYPEn), if present.
    pub name: Option<String>,
    /// Storage and element type.
    pub ty: ColumnType,
    /// Repeat count from TFORMn.
    pub repeat: usize,
    /// Multiplicative scale factor (TSCALn).
    pub scale: f64,
    /// Additive zero offset (TZEROn).
    pub zero: f64,
    /// Raw null sentinel (TNULLn) for integer columns.
    pub blank: Option<i64>,
    /// Declared array shape (TDIMn), innermost axis first.
    pub shape: Option<Vec<usize>>,
    /// Heap base offset for `P`/`Q` columns.
    pub heap_offset: Option<u64>,
}

impl ColumnDescriptor {
    /// Build a descriptor from a TFORMn value with identity scaling.
    pub fn from_tform(tform: &str) -> Result<ColumnDescriptor> {
        let (repeat, ty) = parse_tform(tform)?;
        Ok(ColumnDescriptor {
            name: None,
            ty,
            repeat,
            scale: 1.0,
            zero: 0.0,
            blank: None,
            shape: None,
            heap_offset: None,
        })
    }

    /// Total bytes this column occupies in each row.
    pub fn byte_width(&self) -> usize {
        match self.ty {
            ColumnType::VarP(_) => 8,
            ColumnType::VarQ(_) => 16,
            ColumnType::Fixed(ScalarType::Bit) => self.repeat.div_ceil(8),
            ColumnType::Fixed(t) => self.repeat * t.byte_size(),
        }
    }

    /// True when scale or zero differ from identity.
    pub fn has_scaling(&self) -> bool {
        self.scale != 1.0 || self.zero != 0.0
    }

    /// Classify the scale/zero pair.
    pub fn scaling(&self) -> Scaling {
        if !self.has_scaling() {
            return Scaling::Identity;
        }
        match (exact_i64(self.scale), exact_i64(self.zero)) {
            (Some(scale), Some(zero)) if scale != 0 => Scaling::Integer { scale, zero },
            _ => Scaling::Real {
                scale: self.scale,
                zero: self.zero,
            },
        }
    }

    /// Check the descriptor for internal consistency.
    ///
    /// A malformed descriptor is fatal for this column only; table-open
    /// code degrades the column rather than abandoning the table.
    pub fn validate(&self) -> Result<()> {
        match self.ty {
            ColumnType::Fixed(_) => {
                if self.repeat < 1 {
                    return Err(Error::MalformedDescriptor(
                        "fixed column repeat must be at least 1",
                    ));
                }
            }
            ColumnType::VarP(_) | ColumnType::VarQ(_) => {
                if self.repeat != 1 {
                    return Err(Error::MalformedDescriptor(
                        "variable column holds exactly one array descriptor",
                    ));
                }
            }
        }

        let elem = self.ty.element();

        if self.blank.is_some() && !elem.is_integer() {
            return Err(Error::MalformedDescriptor(
                "null sentinel declared on a non-integer column",
            ));
        }

        if self.has_scaling()
            && matches!(
                elem,
                ScalarType::Logical | ScalarType::Bit | ScalarType::Ascii
            )
        {
            return Err(Error::MalformedDescriptor(
                "scale/zero declared on a non-numeric column",
            ));
        }

        if let Some(shape) = &self.shape {
            if shape.is_empty() || shape.contains(&0) {
                return Err(Error::MalformedDescriptor("declared shape has an empty axis"));
            }
            if let ColumnType::Fixed(_) = self.ty {
                let product: usize = shape.iter().product();
                if product != self.repeat {
                    return Err(Error::MalformedDescriptor(
                        "declared shape product differs from repeat count",
                    ));
                }
            }
        }

        Ok(())
    }

    /// The header keyword values describing this column.
    pub fn header_fields(&self) -> ColumnFields {
        ColumnFields {
            tform: format_tform(self.repeat, self.ty),
            tscal: (self.scale != 1.0).then_some(self.scale),
            tzero: (self.zero != 0.0).then_some(self.zero),
            tnull: self.blank,
            tdim: self.shape.as_deref().map(format_tdim),
        }
    }
}

/// The values the header writer emits as `TFORMn`, `TSCALn`, `TZEROn`,
/// `TNULLn`, and `TDIMn` cards. Identity scale/zero and absent
/// sentinel/shape are `None` and produce no card.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFields {
    pub tform: String,
    pub tscal: Option<f64>,
    pub tzero: Option<f64>,
    pub tnull: Option<i64>,
    pub tdim: Option<String>,
}

/// Parse a TFORMn value like `"1J"`, `"J"`, `"10E"`, `"20A"`, `"1024X"`,
/// `"1PB(200)"`, or `"1QJ"`.
///
/// Returns the repeat count and the column type. The optional `(maxlen)`
/// suffix on variable-length forms is accepted and ignored.
pub fn parse_tform(s: &str) -> Result<(usize, ColumnType)> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::MalformedDescriptor("empty TFORM"));
    }

    // Strip the optional (maxlen) suffix.
    let s = match s.find('(') {
        Some(paren) => &s[..paren],
        None => s,
    };
    if s.is_empty() {
        return Err(Error::MalformedDescriptor("empty TFORM"));
    }

    let bytes = s.as_bytes();

    // rPt / rQt: repeat, descriptor width, element type.
    if s.len() >= 2 && (bytes[s.len() - 2] == b'P' || bytes[s.len() - 2] == b'Q') {
        let elem = ScalarType::from_type_char(bytes[s.len() - 1])
            .ok_or(Error::MalformedDescriptor("unknown element type code"))?;
        let repeat = parse_repeat(&s[..s.len() - 2])?;
        let ty = if bytes[s.len() - 2] == b'P' {
            ColumnType::VarP(elem)
        } else {
            ColumnType::VarQ(elem)
        };
        return Ok((repeat, ty));
    }

    let elem = ScalarType::from_type_char(bytes[s.len() - 1])
        .ok_or(Error::MalformedDescriptor("unknown type code"))?;
    let repeat = parse_repeat(&s[..s.len() - 1])?;
    Ok((repeat, ColumnType::Fixed(elem)))
}

fn parse_repeat(s: &str) -> Result<usize> {
    if s.is_empty() {
        return Ok(1);
    }
    s.parse::<usize>()
        .map_err(|_| Error::MalformedDescriptor("repeat count is not a number"))
}

/// Parse a TDIMn value like `"(3,2)"` into axis lengths, innermost first.
pub fn parse_tdim(s: &str) -> Result<Vec<usize>> {
    let s = s.trim();
    let inner = s
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or(Error::MalformedDescriptor("TDIM is not parenthesized"))?;
    let mut axes = Vec::new();
    for part in inner.split(',') {
        let n = part
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::MalformedDescriptor("TDIM axis is not a number"))?;
        axes.push(n);
    }
    if axes.is_empty() {
        return Err(Error::MalformedDescriptor("TDIM has no axes"));
    }
    Ok(axes)
}

fn format_tform(repeat: usize, ty: ColumnType) -> String {
    match ty {
        ColumnType::Fixed(t) => format!("{}{}", repeat, t.type_char()),
        ColumnType::VarP(t) => format!("{}P{}", repeat, t.type_char()),
        ColumnType::VarQ(t) => format!("{}Q{}", repeat, t.type_char()),
    }
}

fn format_tdim(shape: &[usize]) -> String {
    let mut out = String::from("(");
    for (i, axis) in shape.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{}", axis));
    }
    out.push(')');
    out
}
