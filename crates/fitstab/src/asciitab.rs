//! ASCII table (TABLE extension) field codec.
//!
//! ASCII table cells are printable text at fixed byte positions within the
//! row. The codec here handles one field: slicing it out of a row, parsing
//! it to a [`Cell`], and formatting a [`Cell`] back into a fixed-width
//! field. Row and table orchestration live outside this crate.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::cell::Cell;
use crate::error::{Error, Result};

/// The format code for an ASCII table column, parsed from a TFORMn value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsciiFormat {
    /// `Aw` -- character string, `w` characters wide.
    Character(usize),
    /// `Iw` -- integer, `w` characters wide.
    Integer(usize),
    /// `Fw.d` -- fixed-point decimal, `w` wide with `d` decimal places.
    FloatF(usize, usize),
    /// `Ew.d` -- single-precision exponential, `w` wide with `d` decimals.
    FloatE(usize, usize),
    /// `Dw.d` -- double-precision exponential, `w` wide with `d` decimals.
    DoubleE(usize, usize),
}

impl AsciiFormat {
    /// Total field width in bytes.
    pub fn width(&self) -> usize {
        match self {
            AsciiFormat::Character(w)
            | AsciiFormat::Integer(w)
            | AsciiFormat::FloatF(w, _)
            | AsciiFormat::FloatE(w, _)
            | AsciiFormat::DoubleE(w, _) => *w,
        }
    }

    /// The TFORMn string for this format.
    pub fn tform(&self) -> String {
        match self {
            AsciiFormat::Character(w) => format!("A{}", w),
            AsciiFormat::Integer(w) => format!("I{}", w),
            AsciiFormat::FloatF(w, d) => format!("F{}.{}", w, d),
            AsciiFormat::FloatE(w, d) => format!("E{}.{}", w, d),
            AsciiFormat::DoubleE(w, d) => format!("D{}.{}", w, d),
        }
    }
}

/// Parse an ASCII-table TFORM value such as `"A20"`, `"I10"`, `"F12.4"`,
/// `"E15.7"`, or `"D25.17"`.
pub fn parse_tform_ascii(s: &str) -> Result<AsciiFormat> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::MalformedDescriptor("empty TFORM"));
    }

    let code = s.as_bytes()[0];
    let rest = &s[1..];

    match code {
        b'A' => Ok(AsciiFormat::Character(parse_width(rest)?)),
        b'I' => Ok(AsciiFormat::Integer(parse_width(rest)?)),
        b'F' => {
            let (w, d) = parse_width_decimal(rest)?;
            Ok(AsciiFormat::FloatF(w, d))
        }
        b'E' => {
            let (w, d) = parse_width_decimal(rest)?;
            Ok(AsciiFormat::FloatE(w, d))
        }
        b'D' => {
            let (w, d) = parse_width_decimal(rest)?;
            Ok(AsciiFormat::DoubleE(w, d))
        }
        _ => Err(Error::MalformedDescriptor("unknown ASCII format code")),
    }
}

fn parse_width(s: &str) -> Result<usize> {
    let w = s
        .parse::<usize>()
        .map_err(|_| Error::MalformedDescriptor("field width is not a number"))?;
    if w == 0 {
        return Err(Error::MalformedDescriptor("field width is zero"));
    }
    Ok(w)
}

fn parse_width_decimal(s: &str) -> Result<(usize, usize)> {
    let dot = s
        .find('.')
        .ok_or(Error::MalformedDescriptor("missing decimal count"))?;
    let w = parse_width(&s[..dot])?;
    let d = s[dot + 1..]
        .parse::<usize>()
        .map_err(|_| Error::MalformedDescriptor("decimal count is not a number"))?;
    Ok((w, d))
}

/// Codec for one ASCII table field.
///
/// `tbcol` is the 0-indexed byte position of the field within the row
/// (TBCOLn minus one). `null_literal` is the TNULLn string: a field whose
/// trimmed content equals it decodes to null.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiFieldCodec {
    pub format: AsciiFormat,
    pub tbcol: usize,
    pub null_literal: Option<String>,
}

impl AsciiFieldCodec {
    pub fn new(format: AsciiFormat, tbcol: usize) -> AsciiFieldCodec {
        AsciiFieldCodec {
            format,
            tbcol,
            null_literal: None,
        }
    }

    /// Decode this codec's field out of one row's bytes.
    ///
    /// Character fields decode to [`Cell::Text`] (all-blank is null);
    /// integer fields to [`Cell::Long`]; the three float forms to
    /// [`Cell::Double`], with FITS `D` exponents accepted. A blank numeric
    /// field is null rather than an error.
    pub fn decode_field(&self, row: &[u8]) -> Result<Cell> {
        let width = self.format.width();
        if self.tbcol + width > row.len() {
            return Err(Error::EndOfStream);
        }
        let field = &row[self.tbcol..self.tbcol + width];
        let text = core::str::from_utf8(field).map_err(|_| Error::InvalidValue)?;
        let trimmed = text.trim();

        if let Some(null) = &self.null_literal {
            if trimmed == null.trim() {
                return Ok(Cell::Null);
            }
        }

        match &self.format {
            AsciiFormat::Character(_) => {
                let content = text.trim_end();
                if content.is_empty() {
                    Ok(Cell::Null)
                } else {
                    Ok(Cell::Text(String::from(content)))
                }
            }
            AsciiFormat::Integer(_) => {
                if trimmed.is_empty() {
                    return Ok(Cell::Null);
                }
                trimmed
                    .parse::<i64>()
                    .map(Cell::Long)
                    .map_err(|_| Error::InvalidValue)
            }
            AsciiFormat::FloatF(_, _) | AsciiFormat::FloatE(_, _) | AsciiFormat::DoubleE(_, _) => {
                if trimmed.is_empty() {
                    return Ok(Cell::Null);
                }
                parse_fits_float(trimmed).map(Cell::Double)
            }
        }
    }

    /// Format a cell into this field's fixed width.
    ///
    /// Character content is left-justified, numbers right-justified, both
    /// truncated to the width the header declares. A null cell is the
    /// TNULLn literal when one is declared, an all-blank field otherwise.
    pub fn encode_field(&self, cell: &Cell) -> Result<Vec<u8>> {
        let width = self.format.width();

        if cell.is_null() {
            let mut field = vec![b' '; width];
            if let Some(null) = &self.null_literal {
                let bytes = null.as_bytes();
                let len = bytes.len().min(width);
                field[..len].copy_from_slice(&bytes[..len]);
            }
            return Ok(field);
        }

        let text = match (&self.format, cell) {
            (AsciiFormat::Character(_), Cell::Text(s)) => return Ok(left_justify(s, width)),
            (AsciiFormat::Integer(_), Cell::Long(n)) => format!("{}", n),
            (AsciiFormat::FloatF(_, d), Cell::Double(f)) => format!("{:.*}", *d, f),
            (AsciiFormat::FloatE(_, d), Cell::Double(f)) => format!("{:.*E}", *d, f),
            (AsciiFormat::DoubleE(_, d), Cell::Double(f)) => {
                format!("{:.*E}", *d, f).replace('E', "D")
            }
            _ => return Err(Error::TypeMismatch),
        };
        Ok(right_justify(&text, width))
    }
}

/// Parse a FITS float, accepting `D` exponent notation.
fn parse_fits_float(s: &str) -> Result<f64> {
    let normalized = s.replace(['D', 'd'], "E");
    normalized.parse::<f64>().map_err(|_| Error::InvalidValue)
}

fn left_justify(s: &str, width: usize) -> Vec<u8> {
    let mut field = vec![b' '; width];
    let bytes = s.as_bytes();
    let len = bytes.len().min(width);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

fn right_justify(s: &str, width: usize) -> Vec<u8> {
    let bytes = s.as_bytes();
    if bytes.len() >= width {
        return bytes[bytes.len() - width..].to_vec();
    }
    let mut field = vec![b' '; width];
    field[width - bytes.len()..].copy_from_slice(bytes);
    field
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    // ---- TFORM parsing ----

    #[test]
    fn parse_tform_character() {
        let fmt = parse_tform_ascii("A20").unwrap();
        assert_eq!(fmt, AsciiFormat::Character(20));
        assert_eq!(fmt.width(), 20);
    }

    #[test]
    fn parse_tform_integer() {
        assert_eq!(parse_tform_ascii("I10").unwrap(), AsciiFormat::Integer(10));
    }

    #[test]
    fn parse_tform_floats() {
        assert_eq!(
            parse_tform_ascii("F12.4").unwrap(),
            AsciiFormat::FloatF(12, 4)
        );
        assert_eq!(
            parse_tform_ascii("E15.7").unwrap(),
            AsciiFormat::FloatE(15, 7)
        );
        assert_eq!(
            parse_tform_ascii("D25.17").unwrap(),
            AsciiFormat::DoubleE(25, 17)
        );
    }

    #[test]
    fn parse_tform_with_whitespace() {
        assert_eq!(parse_tform_ascii("  A5  ").unwrap(), AsciiFormat::Character(5));
    }

    #[test]
    fn parse_tform_rejects_bad_input() {
        assert!(parse_tform_ascii("").is_err());
        assert!(parse_tform_ascii("Z9").is_err());
        assert!(parse_tform_ascii("F12").is_err());
        assert!(parse_tform_ascii("A0").is_err());
    }

    #[test]
    fn tform_string_round_trip() {
        for s in ["A20", "I10", "F12.4", "E15.7", "D25.17"] {
            assert_eq!(parse_tform_ascii(s).unwrap().tform(), s);
        }
    }

    // ---- decoding ----

    #[test]
    fn decode_character_field() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Character(6), 2);
        let row = b"XXNGC   tail";
        assert_eq!(codec.decode_field(row).unwrap(), Cell::Text("NGC".to_string()));
    }

    #[test]
    fn decode_blank_character_is_null() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Character(4), 0);
        assert_eq!(codec.decode_field(b"    ").unwrap(), Cell::Null);
    }

    #[test]
    fn decode_integer_field() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Integer(6), 0);
        assert_eq!(codec.decode_field(b"  -420").unwrap(), Cell::Long(-420));
    }

    #[test]
    fn decode_blank_integer_is_null() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Integer(6), 0);
        assert_eq!(codec.decode_field(b"      ").unwrap(), Cell::Null);
    }

    #[test]
    fn decode_unparseable_integer_fails() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Integer(6), 0);
        assert!(matches!(
            codec.decode_field(b"  12x4"),
            Err(Error::InvalidValue)
        ));
    }

    #[test]
    fn decode_fixed_point_field() {
        let codec = AsciiFieldCodec::new(AsciiFormat::FloatF(8, 2), 0);
        assert_eq!(codec.decode_field(b"  -12.25").unwrap(), Cell::Double(-12.25));
    }

    #[test]
    fn decode_d_exponent() {
        let codec = AsciiFieldCodec::new(AsciiFormat::DoubleE(10, 3), 0);
        assert_eq!(codec.decode_field(b"  1.500D02").unwrap(), Cell::Double(150.0));
    }

    #[test]
    fn decode_null_literal() {
        let mut codec = AsciiFieldCodec::new(AsciiFormat::Integer(6), 0);
        codec.null_literal = Some("*".to_string());
        assert_eq!(codec.decode_field(b"     *").unwrap(), Cell::Null);
        assert_eq!(codec.decode_field(b"    42").unwrap(), Cell::Long(42));
    }

    #[test]
    fn decode_short_row_is_end_of_stream() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Integer(6), 4);
        assert!(matches!(
            codec.decode_field(b"12345"),
            Err(Error::EndOfStream)
        ));
    }

    // ---- encoding ----

    #[test]
    fn encode_character_left_justified() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Character(6), 0);
        assert_eq!(
            codec.encode_field(&Cell::Text("NGC".to_string())).unwrap(),
            b"NGC   "
        );
    }

    #[test]
    fn encode_integer_right_justified() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Integer(6), 0);
        assert_eq!(codec.encode_field(&Cell::Long(-42)).unwrap(), b"   -42");
    }

    #[test]
    fn encode_fixed_point() {
        let codec = AsciiFieldCodec::new(AsciiFormat::FloatF(8, 2), 0);
        assert_eq!(codec.encode_field(&Cell::Double(-12.25)).unwrap(), b"  -12.25");
    }

    #[test]
    fn encode_d_exponent() {
        let codec = AsciiFieldCodec::new(AsciiFormat::DoubleE(10, 3), 0);
        let field = codec.encode_field(&Cell::Double(150.0)).unwrap();
        let text = core::str::from_utf8(&field).unwrap();
        assert!(text.contains('D'));
        assert!(!text.contains('E'));
    }

    #[test]
    fn encode_null_blank_field() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Integer(5), 0);
        assert_eq!(codec.encode_field(&Cell::Null).unwrap(), b"     ");
    }

    #[test]
    fn encode_null_literal() {
        let mut codec = AsciiFieldCodec::new(AsciiFormat::Integer(5), 0);
        codec.null_literal = Some("*".to_string());
        assert_eq!(codec.encode_field(&Cell::Null).unwrap(), b"*    ");
    }

    #[test]
    fn encode_type_mismatch() {
        let codec = AsciiFieldCodec::new(AsciiFormat::Integer(5), 0);
        assert!(matches!(
            codec.encode_field(&Cell::Text("x".to_string())),
            Err(Error::TypeMismatch)
        ));
    }

    // ---- round trips ----

    #[test]
    fn round_trip_through_row() {
        let codecs = [
            AsciiFieldCodec::new(AsciiFormat::Character(8), 0),
            AsciiFieldCodec::new(AsciiFormat::Integer(6), 8),
            AsciiFieldCodec::new(AsciiFormat::FloatF(9, 3), 14),
        ];
        let cells = [
            Cell::Text("Arcturus".to_string()),
            Cell::Long(1234),
            Cell::Double(-0.125),
        ];

        let mut row = Vec::new();
        for (codec, cell) in codecs.iter().zip(&cells) {
            row.extend_from_slice(&codec.encode_field(cell).unwrap());
        }
        assert_eq!(row.len(), 23);

        for (codec, cell) in codecs.iter().zip(&cells) {
            assert_eq!(&codec.decode_field(&row).unwrap(), cell);
        }
    }

    #[test]
    fn round_trip_null_with_literal() {
        let mut codec = AsciiFieldCodec::new(AsciiFormat::FloatE(12, 4), 0);
        codec.null_literal = Some("INDEF".to_string());
        let field = codec.encode_field(&Cell::Null).unwrap();
        assert_eq!(codec.decode_field(&field).unwrap(), Cell::Null);
    }
}
