//! Envelope checks for MRMS GRIB2 payloads.
//!
//! Only the indicator section is read. Grid definitions and data sections are
//! never decoded, so coverage comes from configuration rather than the file.

use std::io::{Cursor, Read};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;

use crate::constants::{GRIB_EDITION_OFFSET, GRIB_MAGIC, GZIP_MAGIC};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GribEnvelope {
    pub edition: u8,
    pub compressed: bool,
    pub decoded_len: usize,
}

pub fn is_gzipped(payload: &[u8]) -> bool {
    payload.len() >= GZIP_MAGIC.len() && payload[..GZIP_MAGIC.len()] == GZIP_MAGIC
}

pub fn inspect_payload(payload: &[u8]) -> Result<GribEnvelope> {
    if is_gzipped(payload) {
        let mut decoder = GzDecoder::new(Cursor::new(payload));
        let mut grib = Vec::new();
        decoder
            .read_to_end(&mut grib)
            .context("Failed to gunzip GRIB payload")?;
        return inspect_grib(&grib, true);
    }
    inspect_grib(payload, false)
}

fn inspect_grib(buffer: &[u8], compressed: bool) -> Result<GribEnvelope> {
    if buffer.len() < GRIB_MAGIC.len() || &buffer[..GRIB_MAGIC.len()] != GRIB_MAGIC {
        bail!("MRMS payload does not start with GRIB bytes");
    }
    let edition = *buffer
        .get(GRIB_EDITION_OFFSET)
        .context("GRIB indicator section is truncated")?;

    Ok(GribEnvelope {
        edition,
        compressed,
        decoded_len: buffer.len(),
    })
}
