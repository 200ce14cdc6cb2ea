//! Binary table column encoding.
//!
//! [`ColumnWriter`] mirrors the decode matrix in reverse: given the same
//! descriptor, `decode(encode(cell))` returns the cell. The writer compiles
//! its plan once and rejects cells that do not belong to the column.
//!
//! Variable-size columns outside the heap path cannot be streamed: the
//! on-disk width is declared once in the header and fixed for the rest of
//! the file, so [`measure_repeat`] must see every cell of a column before
//! any byte is committed. Heap-indirected cells go through
//! [`ColumnWriter::encode_var_cell`] and a [`HeapBuffer`] instead.

use alloc::vec;
use alloc::vec::Vec;

use crate::cell::Cell;
use crate::decode::{build_plan, CellPlan, FloatPlan, IntPlan, IntTarget};
use crate::descriptor::{ColumnDescriptor, ColumnType, ScalarType, TZERO_U64};
use crate::error::{Error, Result};
use crate::io::DataSink;
use crate::record;

/// Write-side options.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Store application i8 columns as `B` with the signed-byte offset
    /// convention instead of widening them to `I`.
    pub allow_signed_byte: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            allow_signed_byte: true,
        }
    }
}

/// Application-side column types the disk-format chooser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Text,
    ComplexF32,
    ComplexF64,
}

/// Pick the narrowest lossless on-disk representation of an application
/// type: the element type plus the scale/zero pair to declare.
///
/// Unsigned integers use the FITS offset conventions (`TZERO` of 2^15,
/// 2^31, 2^63); i8 uses the signed-byte convention when
/// [`EncodeOptions::allow_signed_byte`] permits, a plain `I` column
/// otherwise.
pub fn disk_format(app: AppType, opts: &EncodeOptions) -> (ScalarType, f64, f64) {
    match app {
        AppType::Bool => (ScalarType::Logical, 1.0, 0.0),
        AppType::I8 => {
            if opts.allow_signed_byte {
                (ScalarType::Byte, 1.0, -128.0)
            } else {
                (ScalarType::Short, 1.0, 0.0)
            }
        }
        AppType::U8 => (ScalarType::Byte, 1.0, 0.0),
        AppType::I16 => (ScalarType::Short, 1.0, 0.0),
        AppType::U16 => (ScalarType::Short, 1.0, 32768.0),
        AppType::I32 => (ScalarType::Int, 1.0, 0.0),
        AppType::U32 => (ScalarType::Int, 1.0, 2147483648.0),
        AppType::I64 => (ScalarType::Long, 1.0, 0.0),
        AppType::U64 => (ScalarType::Long, 1.0, TZERO_U64),
        AppType::F32 => (ScalarType::Float, 1.0, 0.0),
        AppType::F64 => (ScalarType::Double, 1.0, 0.0),
        AppType::Text => (ScalarType::Ascii, 1.0, 0.0),
        AppType::ComplexF32 => (ScalarType::ComplexFloat, 1.0, 0.0),
        AppType::ComplexF64 => (ScalarType::ComplexDouble, 1.0, 0.0),
    }
}

/// Fixed on-disk repeat count able to hold every cell of a column.
///
/// This first pass is mandatory for variable-size strings and arrays: the
/// column width is declared once in the header, so the cells must be seen
/// (buffered or re-scanned) before any row byte is written.
pub fn measure_repeat(cells: &[Cell]) -> usize {
    cells.iter().map(Cell::len).max().unwrap_or(1).max(1)
}

/// Fixed field width for an `A` column: the longest text cell in bytes.
/// Null cells (all-blank fields) need no width of their own.
pub fn measure_text_width(cells: &[Cell]) -> usize {
    cells
        .iter()
        .map(|cell| match cell {
            Cell::Text(s) => s.len(),
            _ => 0,
        })
        .max()
        .unwrap_or(1)
        .max(1)
}

/// Heap staging area for variable-length cells.
///
/// Elements are appended here during the row pass; the finished buffer is
/// the data unit's heap area, to be placed at the descriptor's heap
/// offset by the orchestration layer.
#[derive(Debug, Default)]
pub struct HeapBuffer {
    buf: Vec<u8>,
}

impl HeapBuffer {
    pub fn new() -> Self {
        HeapBuffer { buf: Vec::new() }
    }

    /// Bytes staged so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the staged heap bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the buffer, returning the heap bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl DataSink for HeapBuffer {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buf.len() as u64
    }
}

/// A compiled encoder for one column.
#[derive(Debug, Clone)]
pub struct ColumnWriter {
    ty: ColumnType,
    repeat: usize,
    blank: Option<i64>,
    plan: CellPlan,
    array: bool,
    bytes_written: u64,
}

impl ColumnWriter {
    /// Compile the encode plan for a descriptor.
    pub fn new(desc: &ColumnDescriptor) -> Result<ColumnWriter> {
        desc.validate()?;
        let elem = desc.ty.element();
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
        Ok(ColumnWriter {
            ty: desc.ty,
            repeat: desc.repeat,
            blank: desc.blank,
            plan,
            array,
            bytes_written: 0,
        })
    }

    /// Raw bytes this writer has produced (row slots plus heap elements).
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Encode one fixed-column cell at the sink's cursor.
    pub fn encode_cell<S: DataSink + ?Sized>(&mut self, sink: &mut S, cell: &Cell) -> Result<()> {
        if self.ty.is_variable() {
            return Err(Error::UnsupportedOperation(
                "fixed-cell encode on a variable column",
            ));
        }
        let start = sink.position();
        match &self.plan {
            CellPlan::Bits => self.encode_bits(sink, cell, self.repeat)?,
            CellPlan::Text { width } => encode_text(sink, cell, *width)?,
            CellPlan::TextArray { width, count } => {
                let Cell::Array(items) = cell else {
                    return Err(Error::TypeMismatch);
                };
                if items.len() != *count {
                    return Err(Error::TypeMismatch);
                }
                for item in items {
                    encode_text(sink, item, *width)?;
                }
            }
            _ if self.array => {
                let Cell::Array(items) = cell else {
                    return Err(Error::TypeMismatch);
                };
                if items.len() != self.repeat {
                    return Err(Error::TypeMismatch);
                }
                for item in items {
                    self.encode_element(sink, item)?;
                }
            }
            _ => self.encode_element(sink, cell)?,
        }
        self.bytes_written += sink.position() - start;
        Ok(())
    }

    /// Encode one heap-indirected cell: stage the elements in `heap` and
    /// write the (count, offset) slot at the sink's cursor.
    ///
    /// A null cell writes the (0, 0) slot and stages nothing.
    pub fn encode_var_cell<S: DataSink + ?Sized>(
        &mut self,
        sink: &mut S,
        heap: &mut HeapBuffer,
        cell: &Cell,
    ) -> Result<()> {
        let wide = match self.ty {
            ColumnType::VarP(_) => false,
            ColumnType::VarQ(_) => true,
            ColumnType::Fixed(_) => {
                return Err(Error::UnsupportedOperation(
                    "heap encode on a fixed column",
                ))
            }
        };

        let start = sink.position();
        let staged_before = heap.len() as u64;
        let count = match (&self.plan, cell) {
            (_, Cell::Null) => 0,
            (CellPlan::Text { .. }, Cell::Text(s)) => {
                heap.write_bytes(s.as_bytes())?;
                s.len()
            }
            (CellPlan::Bits, Cell::Bits(bits)) => {
                self.encode_bits(heap, cell, bits.len())?;
                bits.len()
            }
            (CellPlan::Text { .. }, _) | (CellPlan::Bits, _) => {
                return Err(Error::TypeMismatch)
            }
            (_, Cell::Array(items)) => {
                for item in items {
                    self.encode_element(heap, item)?;
                }
                items.len()
            }
            _ => return Err(Error::TypeMismatch),
        };
        let offset = if count == 0 { 0 } else { staged_before };

        if wide {
            sink.write_i64(count as i64)?;
            sink.write_i64(offset as i64)?;
        } else {
            let count32 = i32::try_from(count).map_err(|_| Error::InvalidValue)?;
            let offset32 = i32::try_from(offset).map_err(|_| Error::InvalidValue)?;
            sink.write_i32(count32)?;
            sink.write_i32(offset32)?;
        }

        self.bytes_written += (sink.position() - start) + (heap.len() as u64 - staged_before);
        Ok(())
    }

    fn encode_bits<S: DataSink + ?Sized>(
        &self,
        sink: &mut S,
        cell: &Cell,
        width: usize,
    ) -> Result<()> {
        let Cell::Bits(bits) = cell else {
            return Err(Error::TypeMismatch);
        };
        if bits.len() > width {
            return Err(Error::TypeMismatch);
        }
        let mut bytes = vec![0u8; width.div_ceil(8)];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        sink.write_bytes(&bytes)
    }

    fn encode_element<S: DataSink + ?Sized>(&self, sink: &mut S, cell: &Cell) -> Result<()> {
        match &self.plan {
            CellPlan::Logical => {
                let byte = match cell {
                    Cell::Logical(true) => b'T',
                    Cell::Logical(false) => b'F',
                    Cell::Null => 0,
                    _ => return Err(Error::TypeMismatch),
                };
                sink.write_u8(byte)
            }
            CellPlan::Int(plan) => {
                let raw = match cell {
                    Cell::Null => self.blank.ok_or(Error::UnsupportedOperation(
                        "null cell on a column with no null sentinel",
                    ))?,
                    _ => int_raw(*plan, cell, self.ty.element())?,
                };
                self.write_raw_int(sink, raw)
            }
            CellPlan::Float(plan) => {
                let raw = match (plan, cell) {
                    (FloatPlan::Raw, Cell::Float(v)) => *v,
                    (FloatPlan::Scaled { scale, zero }, Cell::Double(v)) => {
                        ((*v - *zero) / *scale) as f32
                    }
                    _ => return Err(Error::TypeMismatch),
                };
                sink.write_f32(raw)
            }
            CellPlan::Double(plan) => {
                let raw = match (plan, cell) {
                    (FloatPlan::Raw, Cell::Double(v)) => *v,
                    (FloatPlan::Scaled { scale, zero }, Cell::Double(v)) => (*v - *zero) / *scale,
                    _ => return Err(Error::TypeMismatch),
                };
                sink.write_f64(raw)
            }
            CellPlan::ComplexFloat(plan) => match (plan, cell) {
                (FloatPlan::Raw, Cell::ComplexF(re, im)) => {
                    sink.write_f32(*re)?;
                    sink.write_f32(*im)
                }
                (FloatPlan::Scaled { scale, zero }, Cell::ComplexD(re, im)) => {
                    sink.write_f32(((*re - *zero) / *scale) as f32)?;
                    sink.write_f32(((*im - *zero) / *scale) as f32)
                }
                _ => Err(Error::TypeMismatch),
            },
            CellPlan::ComplexDouble(plan) => match (plan, cell) {
                (FloatPlan::Raw, Cell::ComplexD(re, im)) => {
                    sink.write_f64(*re)?;
                    sink.write_f64(*im)
                }
                (FloatPlan::Scaled { scale, zero }, Cell::ComplexD(re, im)) => {
                    sink.write_f64((*re - *zero) / *scale)?;
                    sink.write_f64((*im - *zero) / *scale)
                }
                _ => Err(Error::TypeMismatch),
            },
            CellPlan::Bits | CellPlan::Text { .. } | CellPlan::TextArray { .. } => {
                unreachable!("cell-level plan reached element encode")
            }
        }
    }

    fn write_raw_int<S: DataSink + ?Sized>(&self, sink: &mut S, raw: i64) -> Result<()> {
        let elem = self.ty.element();
        let (lo, hi) = elem.raw_range().expect("integer plan on integer types only");
        if raw < lo || raw > hi {
            return Err(Error::InvalidValue);
        }
        match elem {
            ScalarType::Byte => sink.write_u8(raw as u8),
            ScalarType::Short => sink.write_i16(raw as i16),
            ScalarType::Int => sink.write_i32(raw as i32),
            _ => sink.write_i64(raw),
        }
    }
}

/// Invert an element plan to the raw on-disk integer.
fn int_raw(plan: IntPlan, cell: &Cell, elem: ScalarType) -> Result<i64> {
    match plan {
        IntPlan::Identity => match (elem, cell) {
            (ScalarType::Byte, Cell::UByte(v)) => Ok(*v as i64),
            (ScalarType::Short, Cell::Short(v)) => Ok(*v as i64),
            (ScalarType::Int, Cell::Int(v)) => Ok(*v as i64),
            (ScalarType::Long, Cell::Long(v)) => Ok(*v),
            _ => Err(Error::TypeMismatch),
        },
        IntPlan::SignedByte => match cell {
            Cell::SByte(v) => Ok((*v as u8 ^ 0x80) as i64),
            _ => Err(Error::TypeMismatch),
        },
        IntPlan::Widen {
            scale,
            zero,
            target,
        } => {
            let value: i128 = match (target, cell) {
                (IntTarget::Short, Cell::Short(v)) => *v as i128,
                (IntTarget::Int, Cell::Int(v)) => *v as i128,
                (IntTarget::Long, Cell::Long(v)) => *v as i128,
                (IntTarget::BigInt, Cell::BigInt(s)) => {
                    s.parse::<i128>().map_err(|_| Error::InvalidValue)?
                }
                _ => return Err(Error::TypeMismatch),
            };
            let shifted = value - zero as i128;
            if shifted % scale as i128 != 0 {
                return Err(Error::InvalidValue);
            }
            let raw = shifted / scale as i128;
            i64::try_from(raw).map_err(|_| Error::InvalidValue)
        }
        IntPlan::UnsignedLongBits => match cell {
            Cell::BigInt(s) => {
                let bits = s.parse::<u64>().map_err(|_| Error::InvalidValue)?;
                Ok(bits as i64)
            }
            _ => Err(Error::TypeMismatch),
        },
        IntPlan::ToDouble { scale, zero } => match cell {
            Cell::Double(v) => {
                let raw = libm::round((*v - zero) / scale);
                if !raw.is_finite() {
                    return Err(Error::InvalidValue);
                }
                Ok(raw as i64)
            }
            _ => Err(Error::TypeMismatch),
        },
    }
}

/// Space-pad or truncate a text cell to the field width; a null cell is
/// all blanks (and decodes back to null).
fn encode_text<S: DataSink + ?Sized>(sink: &mut S, cell: &Cell, width: usize) -> Result<()> {
    let mut field = vec![b' '; width];
    match cell {
        Cell::Null => {}
        Cell::Text(s) => {
            let bytes = s.as_bytes();
            let len = bytes.len().min(width);
            field[..len].copy_from_slice(&bytes[..len]);
        }
        _ => return Err(Error::TypeMismatch),
    }
    sink.write_bytes(&field)
}

/// Total data-unit length for a table of `row_width` x `rows` plus a heap,
/// including the trailing record padding the orchestration layer appends.
pub fn padded_data_len(row_width: usize, rows: usize, heap_len: usize) -> usize {
    record::padded_byte_len(row_width * rows + heap_len)
}
