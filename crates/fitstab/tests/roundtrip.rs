//! Round-trip integration tests for the column codec.
//!
//! All tests run against in-memory byte buffers; the file-backed paging
//! layer has its own suite. Each supported type code is pushed through
//! encode-then-decode with representative scale/zero/sentinel settings,
//! including the null cases and arrays of length 0, 1, and a large N.

use fitstab::cell::Cell;
use fitstab::decode::ColumnReader;
use fitstab::descriptor::{ColumnDescriptor, TZERO_U64};
use fitstab::encode::{ColumnWriter, HeapBuffer};
use fitstab::io::{SliceSource, VecSink};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn column(tform: &str) -> ColumnDescriptor {
    ColumnDescriptor::from_tform(tform).unwrap()
}

/// Encode `cell` with the descriptor, decode the bytes back, and insist on
/// the identical cell.
fn assert_round_trip(desc: &ColumnDescriptor, cell: &Cell) {
    let mut writer = ColumnWriter::new(desc).unwrap();
    let mut sink = VecSink::new();
    writer.encode_cell(&mut sink, cell).unwrap();
    let bytes = sink.into_bytes();
    assert_eq!(
        bytes.len(),
        desc.byte_width(),
        "cell bytes must fill the declared column width"
    );

    let reader = ColumnReader::new(desc).unwrap();
    let mut src = SliceSource::new(&bytes);
    let back = reader.decode(&mut src).unwrap();
    assert_eq!(&back, cell, "decode(encode(v)) must return v");
}

/// Round-trip a heap-indirected cell through an assembled region.
fn assert_var_round_trip(desc: &ColumnDescriptor, cell: &Cell) {
    let slot_len = desc.byte_width();
    let mut writer = ColumnWriter::new(desc).unwrap();
    let mut slots = VecSink::new();
    let mut heap = HeapBuffer::new();
    writer.encode_var_cell(&mut slots, &mut heap, cell).unwrap();

    let heap_base = desc.heap_offset.unwrap();
    let mut region = slots.into_bytes();
    assert_eq!(region.len(), slot_len);
    region.resize(heap_base as usize, 0);
    region.extend_from_slice(heap.bytes());

    let reader = ColumnReader::new(desc).unwrap();
    let mut src = SliceSource::new(&region);
    assert_eq!(&reader.decode(&mut src).unwrap(), cell);
}

// ===========================================================================
// Scalar round-trips per type code
// ===========================================================================

#[test]
fn roundtrip_logical() {
    let desc = column("1L");
    for cell in [Cell::Logical(true), Cell::Logical(false), Cell::Null] {
        assert_round_trip(&desc, &cell);
    }
}

#[test]
fn roundtrip_bytes_unscaled() {
    let desc = column("1B");
    for v in [0u8, 1, 127, 128, 255] {
        assert_round_trip(&desc, &Cell::UByte(v));
    }
}

#[test]
fn roundtrip_shorts() {
    let desc = column("1I");
    for v in [0i16, 1, -1, i16::MIN, i16::MAX] {
        assert_round_trip(&desc, &Cell::Short(v));
    }
}

#[test]
fn roundtrip_ints() {
    let desc = column("1J");
    for v in [0i32, -1, i32::MIN, i32::MAX, 70_000] {
        assert_round_trip(&desc, &Cell::Int(v));
    }
}

#[test]
fn roundtrip_longs() {
    let desc = column("1K");
    for v in [0i64, -1, i64::MIN, i64::MAX] {
        assert_round_trip(&desc, &Cell::Long(v));
    }
}

#[test]
fn roundtrip_floats() {
    let desc = column("1E");
    for v in [0.0f32, 1.5, -2.5, f32::MAX, f32::MIN_POSITIVE] {
        assert_round_trip(&desc, &Cell::Float(v));
    }
}

#[test]
fn roundtrip_doubles() {
    let desc = column("1D");
    for v in [0.0f64, 3.141592653589793, -1e300, 5e-324] {
        assert_round_trip(&desc, &Cell::Double(v));
    }
}

#[test]
fn roundtrip_complex() {
    assert_round_trip(&column("1C"), &Cell::ComplexF(1.5, -0.5));
    assert_round_trip(&column("1M"), &Cell::ComplexD(-3.25, 8.0));
}

#[test]
fn roundtrip_text() {
    let desc = column("12A");
    assert_round_trip(&desc, &Cell::Text("NGC 4594".into()));
    assert_round_trip(&desc, &Cell::Null);
}

#[test]
fn roundtrip_bits() {
    let desc = column("12X");
    let bits: Vec<bool> = (0..12).map(|i| i % 2 == 0).collect();
    assert_round_trip(&desc, &Cell::Bits(bits));
}

// ===========================================================================
// Scale / zero / sentinel combinations
// ===========================================================================

#[test]
fn roundtrip_signed_byte_convention() {
    let mut desc = column("1B");
    desc.zero = -128.0;
    for v in [i8::MIN, -56, 0, 1, i8::MAX] {
        assert_round_trip(&desc, &Cell::SByte(v));
    }
}

#[test]
fn roundtrip_unsigned_conventions() {
    let mut desc = column("1I");
    desc.zero = 32768.0;
    for v in [0i32, 1, 65535] {
        assert_round_trip(&desc, &Cell::Int(v));
    }

    let mut desc = column("1J");
    desc.zero = 2147483648.0;
    for v in [0i64, 4294967295] {
        assert_round_trip(&desc, &Cell::Long(v));
    }

    let mut desc = column("1K");
    desc.zero = TZERO_U64;
    for v in ["0", "1", "9223372036854775808", "18446744073709551615"] {
        assert_round_trip(&desc, &Cell::BigInt(v.into()));
    }
}

#[test]
fn roundtrip_integer_scaled() {
    let mut desc = column("1I");
    desc.scale = 2.0;
    desc.zero = 5.0;
    desc.blank = Some(-999);
    for cell in [Cell::Int(5), Cell::Int(-1991), Cell::Int(65539), Cell::Null] {
        assert_round_trip(&desc, &cell);
    }
}

#[test]
fn roundtrip_real_scaled() {
    let mut desc = column("1J");
    desc.scale = 0.25;
    desc.zero = -1.0;
    assert_round_trip(&desc, &Cell::Double(0.5));

    let mut desc = column("1E");
    desc.scale = 10.0;
    assert_round_trip(&desc, &Cell::Double(25.0));
}

#[test]
fn roundtrip_sentinel_with_identity_scaling() {
    let mut desc = column("1J");
    desc.blank = Some(i32::MIN as i64);
    assert_round_trip(&desc, &Cell::Null);
    assert_round_trip(&desc, &Cell::Int(0));
}

// ===========================================================================
// Arrays: length 0, 1, and large
// ===========================================================================

#[test]
fn roundtrip_fixed_arrays() {
    assert_round_trip(
        &column("1E"),
        &Cell::Float(9.75), // repeat 1 stays scalar
    );

    let desc = column("64D");
    let cells: Vec<Cell> = (0..64).map(|i| Cell::Double(i as f64 * 0.5)).collect();
    assert_round_trip(&desc, &Cell::Array(cells));

    let mut desc = column("6I");
    desc.blank = Some(-1);
    desc.shape = Some(vec![3, 2]);
    assert_round_trip(
        &desc,
        &Cell::Array(vec![
            Cell::Short(1),
            Cell::Null,
            Cell::Short(3),
            Cell::Short(4),
            Cell::Short(5),
            Cell::Null,
        ]),
    );
}

#[test]
fn roundtrip_var_arrays() {
    let mut desc = column("1PJ");
    desc.heap_offset = Some(32);

    assert_var_round_trip(&desc, &Cell::Array(vec![]));
    assert_var_round_trip(&desc, &Cell::Array(vec![Cell::Int(-5)]));

    let large: Vec<Cell> = (0..500).map(Cell::Int).collect();
    assert_var_round_trip(&desc, &Cell::Array(large));
}

#[test]
fn roundtrip_var_q_and_text() {
    let mut desc = column("1QD");
    desc.heap_offset = Some(16);
    assert_var_round_trip(
        &desc,
        &Cell::Array(vec![Cell::Double(1.5), Cell::Double(-2.5)]),
    );

    let mut desc = column("1PA");
    desc.heap_offset = Some(8);
    assert_var_round_trip(&desc, &Cell::Text("variable".into()));
}

// ===========================================================================
// The concrete wire-format vectors
// ===========================================================================

#[test]
fn unsigned_byte_trick_bit_pattern() {
    let mut desc = column("1B");
    desc.zero = -128.0;
    let reader = ColumnReader::new(&desc).unwrap();

    // Raw 0x48 carries the flipped high bit of 0xC8 (200 as an unsigned
    // byte, -56 as the signed one).
    let mut src = SliceSource::new(&[0x48]);
    let cell = reader.decode(&mut src).unwrap();
    let Cell::SByte(v) = cell else {
        panic!("expected a signed byte, got {cell:?}");
    };
    assert_eq!(v as u8, 200);

    // Encoding the same cell stores 0x48 again.
    let mut writer = ColumnWriter::new(&desc).unwrap();
    let mut sink = VecSink::new();
    writer.encode_cell(&mut sink, &Cell::SByte(v)).unwrap();
    assert_eq!(sink.bytes(), &[0x48]);
}

#[test]
fn sentinel_precedes_scaling() {
    let mut desc = column("1I");
    desc.blank = Some(-999);
    desc.scale = 2.0;
    desc.zero = 5.0;
    let reader = ColumnReader::new(&desc).unwrap();

    let raw = (-999i16).to_be_bytes();
    let mut src = SliceSource::new(&raw);
    // Without the sentinel this would scale to -1993; the raw comparison
    // wins.
    assert_eq!(reader.decode(&mut src).unwrap(), Cell::Null);
}

#[test]
fn k_unsigned_overflow_decodes_as_decimal_string() {
    let mut desc = column("1K");
    desc.zero = TZERO_U64;
    let reader = ColumnReader::new(&desc).unwrap();

    let raw = [0xFFu8; 8];
    let mut src = SliceSource::new(&raw);
    assert_eq!(
        reader.decode(&mut src).unwrap(),
        Cell::BigInt("18446744073709551615".into())
    );
}

#[test]
fn heap_slot_vector() {
    // Row slot (count=3, offset=16) into a heap of shorts at base 24.
    let mut desc = column("1PI");
    desc.heap_offset = Some(24);
    let mut region = vec![0u8; 24 + 24];
    region[..4].copy_from_slice(&3i32.to_be_bytes());
    region[4..8].copy_from_slice(&16i32.to_be_bytes());
    for (i, v) in [7i16, 8, 9].iter().enumerate() {
        let at = 24 + 16 + i * 2;
        region[at..at + 2].copy_from_slice(&v.to_be_bytes());
    }

    let reader = ColumnReader::new(&desc).unwrap();
    let mut src = SliceSource::new(&region);
    let before = fitstab::io::DataSource::position(&src);
    let cell = reader.decode(&mut src).unwrap();
    assert_eq!(
        cell,
        Cell::Array(vec![Cell::Short(7), Cell::Short(8), Cell::Short(9)])
    );
    assert_eq!(
        fitstab::io::DataSource::position(&src),
        before,
        "heap decode must leave the cursor where it found it"
    );
}

#[test]
fn sentinel_allocator_vector() {
    use fitstab::sentinel::SentinelScanner;

    let mut scanner = SentinelScanner::new(-128, 127);
    for v in -5..=5 {
        scanner.observe(v);
    }
    let first = scanner.choose();
    assert!(first.fresh);
    assert!(!(-5..=5).contains(&first.value));

    // Same observations, same choice.
    let mut again = SentinelScanner::new(-128, 127);
    for v in -5..=5 {
        again.observe(v);
    }
    assert_eq!(again.choose(), first);
}

// ===========================================================================
// Header field emission feeds the external card writer
// ===========================================================================

#[test]
fn header_fields_round_trip_descriptor() {
    let mut desc = column("1K");
    desc.zero = TZERO_U64;
    desc.blank = Some(0);
    let fields = desc.header_fields();
    assert_eq!(fields.tform, "1K");
    assert_eq!(fields.tzero, Some(TZERO_U64));
    assert_eq!(fields.tnull, Some(0));
    assert_eq!(fields.tscal, None);

    let mut rebuilt = column(&fields.tform);
    if let Some(zero) = fields.tzero {
        rebuilt.zero = zero;
    }
    if let Some(tnull) = fields.tnull {
        rebuilt.blank = Some(tnull);
    }
    assert_eq!(rebuilt.zero, desc.zero);
    assert_eq!(rebuilt.blank, desc.blank);
}
