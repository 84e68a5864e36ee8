// Copyright © 2024 Pathway

use std::io::Cursor;

use assert_matches::assert_matches;

use udf_worker::channel::{Frame, FrameReader, FrameWriter, SpecialLength};
use udf_worker::engine::Error;

use super::helpers::{into_bytes, new_input};

#[test]
fn test_sentinels_never_collide_with_lengths() {
    for special in SpecialLength::ALL {
        assert!(special.code() < 0);
        assert_eq!(SpecialLength::from_code(special.code()), Some(special));
    }
    let mut codes: Vec<i32> = SpecialLength::ALL.iter().map(|s| s.code()).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), SpecialLength::ALL.len());
    assert_eq!(SpecialLength::from_code(0), None);
    assert_eq!(SpecialLength::from_code(i32::MAX), None);
}

#[test]
fn test_frames_and_controls_interleave() -> eyre::Result<()> {
    let mut input = new_input();
    input.write_frame(b"hello")?;
    input.write_special(SpecialLength::Null)?;
    input.write_frame(b"")?;
    input.write_long(-7)?;
    input.write_bool(true)?;
    input.write_utf8("zażółć")?;
    input.write_special(SpecialLength::EndOfDataSection)?;

    let mut reader = FrameReader::new(Cursor::new(into_bytes(input)?));
    assert_eq!(reader.read_frame()?, Frame::Data(b"hello".to_vec()));
    assert_eq!(reader.read_frame()?, Frame::Control(SpecialLength::Null));
    assert_eq!(reader.read_frame()?, Frame::Data(Vec::new()));
    assert_eq!(reader.read_long()?, -7);
    assert!(reader.read_bool()?);
    assert_eq!(reader.read_utf8()?, "zażółć");
    assert_eq!(
        reader.read_frame()?,
        Frame::Control(SpecialLength::EndOfDataSection)
    );
    Ok(())
}

#[test]
fn test_integers_are_big_endian() -> eyre::Result<()> {
    let mut bytes = Vec::new();
    {
        let mut writer = FrameWriter::new(&mut bytes);
        writer.write_int(1)?;
        writer.write_special(SpecialLength::EndOfStream)?;
        writer.flush()?;
    }
    assert_eq!(bytes, vec![0, 0, 0, 1, 0xff, 0xff, 0xff, 0xfc]);
    Ok(())
}

#[test]
fn test_unknown_negative_length_is_malformed() -> eyre::Result<()> {
    let mut input = new_input();
    input.write_int(-100)?;
    let mut reader = FrameReader::new(Cursor::new(into_bytes(input)?));
    assert_matches!(reader.read_frame(), Err(Error::MalformedLength(-100)));
    Ok(())
}

#[test]
fn test_control_frame_where_data_expected() -> eyre::Result<()> {
    let mut input = new_input();
    input.write_special(SpecialLength::Null)?;
    let mut reader = FrameReader::new(Cursor::new(into_bytes(input)?));
    assert_matches!(
        reader.read_bytes(),
        Err(Error::UnexpectedControl {
            actual: SpecialLength::Null,
            ..
        })
    );
    Ok(())
}

#[test]
fn test_short_read_is_an_error() -> eyre::Result<()> {
    let mut input = new_input();
    input.write_int(10)?;
    input.write_frame(b"abc")?;
    let mut reader = FrameReader::new(Cursor::new(into_bytes(input)?));
    assert_eq!(reader.read_int()?, 10);
    assert_matches!(reader.read_long(), Err(Error::Io(_)));
    Ok(())
}
