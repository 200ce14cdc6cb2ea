//! Binary table column decoding.
//!
//! A [`ColumnReader`] compiles a column descriptor into a fixed decode plan
//! once, at table-open time; per-cell decoding then runs the plan with no
//! further type decisions. Decoding is a pure function of the descriptor
//! and the bytes under the cursor.
//!
//! The selection rules, by TFORM type character:
//!
//! - `L`: `T` is true, `F` is false, any other byte is null.
//! - `X`: packed bits, most significant first.
//! - `B`/`I`/`J`/`K`: an exact integer scale/zero widens to the smallest
//!   signed type that holds every scaled value; an inexact one promotes to
//!   f64; `B` with `(scale=1, zero=-128)` flips the high bit to a signed
//!   byte; `K` with an integer offset renders through 128-bit arithmetic
//!   as a decimal string, and `(scale=1, zero=2^63)` reinterprets the raw
//!   bit pattern as unsigned 64-bit, also rendered as a decimal string.
//! - `E`/`D`: scaled values promote to f64; unscaled values keep the
//!   declared width.
//! - `A`: trailing blanks trimmed, an embedded NUL ends the string, an
//!   all-blank scalar field is null.
//! - `C`/`M`: (real, imaginary) pairs.
//! - `P`/`Q`: the row slot holds (count, heap offset); decoding jumps to
//!   the heap, decodes `count` elements by the element rules, and restores
//!   the cursor exactly.
//!
//! A declared null sentinel is compared against the raw on-disk value
//! before any scaling is applied.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use bytemuck::pod_collect_to_vec;

use crate::cell::Cell;
use crate::descriptor::{ColumnDescriptor, ColumnType, ScalarType, Scaling, TZERO_U64};
use crate::error::{Error, Result};
use crate::io::DataSource;

/// Widened integer output width, picked at plan time so the scaled range
/// always fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IntTarget {
    Short,
    Int,
    Long,
    BigInt,
}

/// Per-element plan for integer columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum IntPlan {
    /// Raw value in the column's native width.
    Identity,
    /// `B` with `(scale=1, zero=-128)`: high-bit flip to a signed byte.
    SignedByte,
    /// Exact integer scaling into a wider signed type.
    Widen {
        scale: i64,
        zero: i64,
        target: IntTarget,
    },
    /// `K` with `(scale=1, zero=2^63)`: raw bits as unsigned 64-bit.
    UnsignedLongBits,
    /// Inexact scaling: promote to f64.
    ToDouble { scale: f64, zero: f64 },
}

/// Per-element plan for float columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FloatPlan {
    Raw,
    Scaled { scale: f64, zero: f64 },
}

/// Cell-level plan.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CellPlan {
    Logical,
    Bits,
    Text { width: usize },
    TextArray { width: usize, count: usize },
    Int(IntPlan),
    Float(FloatPlan),
    Double(FloatPlan),
    ComplexFloat(FloatPlan),
    ComplexDouble(FloatPlan),
}

/// A compiled decoder for one column.
#[derive(Debug, Clone)]
pub struct ColumnReader {
    ty: ColumnType,
    repeat: usize,
    blank: Option<i64>,
    heap_offset: u64,
    plan: CellPlan,
    array: bool,
}

impl ColumnReader {
    /// Compile the decode plan for a descriptor.
    ///
    /// Fails with [`Error::MalformedDescriptor`] when the descriptor is
    /// internally inconsistent; the failure is scoped to this column.
    pub fn new(desc: &ColumnDescriptor) -> Result<ColumnReader> {
        desc.validate()?;

        let elem = desc.ty.element();
        if desc.ty.is_variable() && desc.heap_offset.is_none() {
            return Err(Error::MalformedDescriptor(
                "variable column decoded without a heap offset",
            ));
        }

        let plan = build_plan(desc, elem)?;

        let array = match plan {
            CellPlan::Logical
            | CellPlan::Int(_)
            | CellPlan::Float(_)
            | CellPlan::Double(_)
            | CellPlan::ComplexFloat(_)
            | CellPlan::ComplexDouble(_) => desc.repeat > 1 || desc.shape.is_some(),
            _ => false,
        };

        Ok(ColumnReader {
            ty: desc.ty,
            repeat: desc.repeat,
            blank: desc.blank,
            heap_offset: desc.heap_offset.unwrap_or(0),
            plan,
            array,
        })
    }

    /// Decode one cell from the cursor.
    ///
    /// Fixed columns leave the cursor just past the cell. Heap-indirected
    /// columns restore the cursor to its pre-decode position; they require
    /// a random-access source and degrade to [`Cell::Null`] with a logged
    /// warning when given a sequential one.
    pub fn decode<S: DataSource + ?Sized>(&self, src: &mut S) -> Result<Cell> {
        match self.ty {
            ColumnType::Fixed(_) => self.decode_fixed(src),
            ColumnType::VarP(_) => self.decode_var(src, false),
            ColumnType::VarQ(_) => self.decode_var(src, true),
        }
    }

    fn decode_fixed<S: DataSource + ?Sized>(&self, src: &mut S) -> Result<Cell> {
        match &self.plan {
            CellPlan::Logical => self.decode_repeated(src, self.repeat),
            CellPlan::Bits => {
                let mut bytes = vec![0u8; self.repeat.div_ceil(8)];
                src.read_bytes(&mut bytes)?;
                Ok(Cell::Bits(unpack_bits(&bytes, self.repeat)))
            }
            CellPlan::Text { width } => {
                let mut bytes = vec![0u8; *width];
                src.read_bytes(&mut bytes)?;
                Ok(text_cell(&bytes))
            }
            CellPlan::TextArray { width, count } => {
                let mut bytes = vec![0u8; width * count];
                src.read_bytes(&mut bytes)?;
                let items = bytes
                    .chunks_exact(*width)
                    .map(|chunk| match text_cell(chunk) {
                        // Array elements stay strings; a blank slot is the
                        // empty string, not null.
                        Cell::Null => Cell::Text(String::new()),
                        cell => cell,
                    })
                    .collect();
                Ok(Cell::Array(items))
            }
            // Bulk fast path for unscaled float arrays.
            CellPlan::Float(FloatPlan::Raw) if self.array => {
                let mut bytes = vec![0u8; self.repeat * 4];
                src.read_bytes(&mut bytes)?;
                let words: Vec<u32> = pod_collect_to_vec(&bytes[..]);
                Ok(Cell::Array(
                    words
                        .into_iter()
                        .map(|w| Cell::Float(f32::from_bits(u32::from_be(w))))
                        .collect(),
                ))
            }
            CellPlan::Double(FloatPlan::Raw) if self.array => {
                let mut bytes = vec![0u8; self.repeat * 8];
                src.read_bytes(&mut bytes)?;
                let words: Vec<u64> = pod_collect_to_vec(&bytes[..]);
                Ok(Cell::Array(
                    words
                        .into_iter()
                        .map(|w| Cell::Double(f64::from_bits(u64::from_be(w))))
                        .collect(),
                ))
            }
            _ => self.decode_repeated(src, self.repeat),
        }
    }

    /// Decode `count` elements element-by-element, wrapping in an array
    /// cell when the column is array-shaped.
    fn decode_repeated<S: DataSource + ?Sized>(&self, src: &mut S, count: usize) -> Result<Cell> {
        if count == 1 && !self.array {
            return self.decode_element(src);
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.decode_element(src)?);
        }
        Ok(Cell::Array(items))
    }

    fn decode_element<S: DataSource + ?Sized>(&self, src: &mut S) -> Result<Cell> {
        match &self.plan {
            CellPlan::Logical => Ok(match src.read_u8()? {
                b'T' => Cell::Logical(true),
                b'F' => Cell::Logical(false),
                _ => Cell::Null,
            }),
            CellPlan::Int(plan) => {
                let raw = match self.ty.element() {
                    ScalarType::Byte => src.read_u8()? as i64,
                    ScalarType::Short => src.read_i16()? as i64,
                    ScalarType::Int => src.read_i32()? as i64,
                    ScalarType::Long => src.read_i64()?,
                    _ => unreachable!("integer plan on non-integer column"),
                };
                // Sentinel comparison happens on the raw pattern, before
                // any scaling.
                if self.blank == Some(raw) {
                    return Ok(Cell::Null);
                }
                Ok(apply_int_plan(*plan, raw, self.ty.element()))
            }
            CellPlan::Float(plan) => {
                let raw = src.read_f32()?;
                Ok(match plan {
                    FloatPlan::Raw => Cell::Float(raw),
                    FloatPlan::Scaled { scale, zero } => {
                        Cell::Double(raw as f64 * *scale + *zero)
                    }
                })
            }
            CellPlan::Double(plan) => {
                let raw = src.read_f64()?;
                Ok(match plan {
                    FloatPlan::Raw => Cell::Double(raw),
                    FloatPlan::Scaled { scale, zero } => Cell::Double(raw * *scale + *zero),
                })
            }
            CellPlan::ComplexFloat(plan) => {
                let re = src.read_f32()?;
                let im = src.read_f32()?;
                Ok(match plan {
                    FloatPlan::Raw => Cell::ComplexF(re, im),
                    FloatPlan::Scaled { scale, zero } => {
                        Cell::ComplexD(re as f64 * *scale + *zero, im as f64 * *scale + *zero)
                    }
                })
            }
            CellPlan::ComplexDouble(plan) => {
                let re = src.read_f64()?;
                let im = src.read_f64()?;
                Ok(match plan {
                    FloatPlan::Raw => Cell::ComplexD(re, im),
                    FloatPlan::Scaled { scale, zero } => {
                        Cell::ComplexD(re * *scale + *zero, im * *scale + *zero)
                    }
                })
            }
            CellPlan::Bits | CellPlan::Text { .. } | CellPlan::TextArray { .. } => {
                unreachable!("cell-level plan reached element decode")
            }
        }
    }

    fn decode_var<S: DataSource + ?Sized>(&self, src: &mut S, wide: bool) -> Result<Cell> {
        if !src.is_random_access() {
            tracing::warn!(
                "variable-length column needs random access; yielding the null placeholder"
            );
            // Consume the slot so a sequential row sweep stays aligned.
            src.skip(if wide { 16 } else { 8 })?;
            return Ok(Cell::Null);
        }

        let origin = src.position();
        let (count, offset) = if wide {
            (src.read_i64()?, src.read_i64()?)
        } else {
            (src.read_i32()? as i64, src.read_i32()? as i64)
        };

        let cell = self.decode_heap(src, count, offset);
        // The heap excursion must not move the caller's cursor.
        src.seek(origin)?;

        match cell {
            Ok(cell) => Ok(cell),
            Err(Error::Io(e)) => Err(Error::Io(e)),
            Err(_) => {
                tracing::warn!(count, offset, "heap array unreadable; cell degraded to null");
                Ok(Cell::Null)
            }
        }
    }

    fn decode_heap<S: DataSource + ?Sized>(
        &self,
        src: &mut S,
        count: i64,
        offset: i64,
    ) -> Result<Cell> {
        if count < 0 || offset < 0 {
            return Err(Error::InvalidValue);
        }
        let count = count as usize;
        src.seek(self.heap_offset + offset as u64)?;

        match &self.plan {
            CellPlan::Bits => {
                let mut bytes = vec![0u8; count.div_ceil(8)];
                src.read_bytes(&mut bytes)?;
                Ok(Cell::Bits(unpack_bits(&bytes, count)))
            }
            CellPlan::Text { .. } => {
                let mut bytes = vec![0u8; count];
                src.read_bytes(&mut bytes)?;
                Ok(match text_cell(&bytes) {
                    Cell::Null => Cell::Text(String::new()),
                    cell => cell,
                })
            }
            _ => {
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_element(src)?);
                }
                Ok(Cell::Array(items))
            }
        }
    }
}

/// Trim trailing blanks, stop at an embedded NUL, and map the all-blank
/// field to null.
fn text_cell(bytes: &[u8]) -> Cell {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let mut s = String::with_capacity(end);
    for &b in &bytes[..end] {
        s.push(b as char);
    }
    let trimmed = s.trim_end_matches(' ');
    if trimmed.is_empty() {
        Cell::Null
    } else {
        Cell::Text(String::from(trimmed))
    }
}

/// Unpack `count` bits, most significant bit of each byte first.
fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    let mut bits = Vec::with_capacity(count);
    for i in 0..count {
        let byte = bytes[i / 8];
        let mask = 0x80 >> (i % 8);
        bits.push(byte & mask != 0);
    }
    bits
}

fn apply_int_plan(plan: IntPlan, raw: i64, elem: ScalarType) -> Cell {
    match plan {
        IntPlan::Identity => match elem {
            ScalarType::Byte => Cell::UByte(raw as u8),
            ScalarType::Short => Cell::Short(raw as i16),
            ScalarType::Int => Cell::Int(raw as i32),
            _ => Cell::Long(raw),
        },
        IntPlan::SignedByte => Cell::SByte((raw as u8 ^ 0x80) as i8),
        IntPlan::Widen {
            scale,
            zero,
            target,
        } => {
            let value = raw as i128 * scale as i128 + zero as i128;
            match target {
                IntTarget::Short => Cell::Short(value as i16),
                IntTarget::Int => Cell::Int(value as i32),
                IntTarget::Long => Cell::Long(value as i64),
                IntTarget::BigInt => Cell::BigInt(format!("{}", value)),
            }
        }
        IntPlan::UnsignedLongBits => Cell::BigInt(format!("{}", raw as u64)),
        IntPlan::ToDouble { scale, zero } => Cell::Double(raw as f64 * scale + zero),
    }
}

/// Pick the narrowest signed output for an exact integer scaling, or fall
/// back to float promotion when even i64 cannot hold the range.
fn widen_plan(elem: ScalarType, scale: i64, zero: i64) -> IntPlan {
    if elem == ScalarType::Long {
        // No wider native integer exists; keep full precision as text.
        return IntPlan::Widen {
            scale,
            zero,
            target: IntTarget::BigInt,
        };
    }

    let (lo, hi) = elem.raw_range().expect("widen plan on integer types only");
    let a = lo as i128 * scale as i128 + zero as i128;
    let b = hi as i128 * scale as i128 + zero as i128;
    let (min, max) = if a <= b { (a, b) } else { (b, a) };

    let fits = |t_lo: i128, t_hi: i128| min >= t_lo && max <= t_hi;

    let target = if elem == ScalarType::Byte && fits(i16::MIN as i128, i16::MAX as i128) {
        Some(IntTarget::Short)
    } else if elem != ScalarType::Int && fits(i32::MIN as i128, i32::MAX as i128) {
        Some(IntTarget::Int)
    } else if fits(i64::MIN as i128, i64::MAX as i128) {
        Some(IntTarget::Long)
    } else {
        None
    };

    match target {
        Some(target) => IntPlan::Widen {
            scale,
            zero,
            target,
        },
        None => IntPlan::ToDouble {
            scale: scale as f64,
            zero: zero as f64,
        },
    }
}

pub(crate) fn build_plan(desc: &ColumnDescriptor, elem: ScalarType) -> Result<CellPlan> {
    Ok(match elem {
        ScalarType::Logical => CellPlan::Logical,
        ScalarType::Bit => CellPlan::Bits,
        // A declared shape on a heap-indirected column is apparent only;
        // the live count comes from the row slot.
        ScalarType::Ascii => match desc.shape.as_deref() {
            Some([width, rest @ ..]) if !rest.is_empty() && !desc.ty.is_variable() => {
                CellPlan::TextArray {
                    width: *width,
                    count: rest.iter().product(),
                }
            }
            _ => CellPlan::Text {
                width: desc.repeat,
            },
        },
        ScalarType::Byte | ScalarType::Short | ScalarType::Int | ScalarType::Long => {
            // The unsigned-long marker precedes the generic classification:
            // 2^63 is not an exact i64.
            if elem == ScalarType::Long && desc.scale == 1.0 && desc.zero == TZERO_U64 {
                return Ok(CellPlan::Int(IntPlan::UnsignedLongBits));
            }
            CellPlan::Int(match desc.scaling() {
                Scaling::Identity => IntPlan::Identity,
                Scaling::Integer { scale: 1, zero: -128 } if elem == ScalarType::Byte => {
                    IntPlan::SignedByte
                }
                Scaling::Integer { scale, zero } => widen_plan(elem, scale, zero),
                Scaling::Real { scale, zero } => IntPlan::ToDouble { scale, zero },
            })
        }
        ScalarType::Float | ScalarType::Double => {
            let plan = match desc.scaling() {
                Scaling::Identity => FloatPlan::Raw,
                _ => FloatPlan::Scaled {
                    scale: desc.scale,
                    zero: desc.zero,
                },
            };
            if elem == ScalarType::Float {
                CellPlan::Float(plan)
            } else {
                CellPlan::Double(plan)
            }
        }
        ScalarType::ComplexFloat | ScalarType::ComplexDouble => {
            let plan = match desc.scaling() {
                Scaling::Identity => FloatPlan::Raw,
                _ => FloatPlan::Scaled {
                    scale: desc.scale,
                    zero: desc.zero,
                },
            };
            if elem == ScalarType::ComplexFloat {
                CellPlan::ComplexFloat(plan)
            } else {
                CellPlan::ComplexDouble(plan)
            }
        }
    })
}

/// The per-column outcome of compiling a whole table's descriptors.
#[derive(Debug)]
pub enum ColumnPlan {
    /// The column decodes normally.
    Ready(ColumnReader),
    /// The descriptor was malformed; the column is skipped, the table is
    /// not.
    Unsupported {
        name: Option<String>,
        reason: &'static str,
    },
}

/// Compile every column, degrading malformed descriptors to
/// [`ColumnPlan::Unsupported`] with a warning instead of failing the
/// table.
pub fn compile_columns(descs: &[ColumnDescriptor]) -> Vec<ColumnPlan> {
    descs
        .iter()
        .map(|desc| match ColumnReader::new(desc) {
            Ok(reader) => ColumnPlan::Ready(reader),
            Err(e) => {
                let reason = match e {
                    Error::MalformedDescriptor(why) => why,
                    _ => "descriptor could not be compiled",
                };
                tracing::warn!(
                    column = desc.name.as_deref().unwrap_or("<unnamed>"),
                    reason,
                    "column unsupported"
                );
                ColumnPlan::Unsupported {
                    name: desc.name.clone(),
                    reason,
                }
            }
        })
        .collect()
}
