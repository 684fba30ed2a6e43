//! Optical transfer function lookup.
//!
//! OTF files live in one directory and are named
//! `{wavelength}[_{mask}][_{YYYYMMDD}]_otf.raw`. Each holds a PSF: three
//! little-endian `u32` (nz, ny, nx) followed by `nz * ny * nx` `f32` samples.

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDate;
use ndarray::Array3;
use tracing::debug;

use crate::consts::{OTF_SUFFIX, PSF_HEADER_BYTES, RAW_EXTENSION};
use crate::error::OtfError;

/// A calibration file matched to a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Otf {
    pub path: PathBuf,
    pub wavelength: u32,
    pub mask: Option<String>,
    pub date: Option<NaiveDate>,
}

impl Otf {
    /// Read the PSF stored in this file.
    pub fn load_psf(&self) -> Result<Array3<f32>, OtfError> {
        read_psf(&self.path)
    }
}

/// Pick the OTF for `wavelength` (nm) from `otf_dir`.
///
/// Files with the rounded wavelength are candidates. A matching `mask` is
/// preferred, then mask-less files. Among those, the file dated closest to
/// `date` wins; undated files are used when nothing dated is available (or
/// no acquisition date is known).
pub fn resolve(
    wavelength: f64,
    otf_dir: &Path,
    date: Option<NaiveDate>,
    mask: Option<&str>,
) -> Result<Otf, OtfError> {
    if !otf_dir.is_dir() {
        return Err(OtfError::MissingDirectory(otf_dir.to_path_buf()));
    }
    let wave = wavelength.round() as u32;

    let mut candidates: Vec<Otf> = fs::read_dir(otf_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|path| parse_otf_name(&path).map(|(w, m, d)| (path, w, m, d)))
        .filter(|(_, w, _, _)| *w == wave)
        .map(|(path, wavelength, mask, date)| Otf {
            path,
            wavelength,
            mask,
            date,
        })
        .collect();
    candidates.sort_by(|a, b| a.path.cmp(&b.path));

    let with_mask: Vec<&Otf> = match mask {
        Some(m) => candidates
            .iter()
            .filter(|o| o.mask.as_deref() == Some(m))
            .collect(),
        None => Vec::new(),
    };
    let pool: Vec<&Otf> = if with_mask.is_empty() {
        candidates.iter().filter(|o| o.mask.is_none()).collect()
    } else {
        with_mask
    };

    let chosen = match date {
        Some(acquired) => pool
            .iter()
            .filter_map(|o| o.date.map(|d| (o, (d - acquired).num_days().abs())))
            .min_by_key(|(_, days)| *days)
            .map(|(o, _)| *o)
            .or_else(|| pool.iter().find(|o| o.date.is_none()).copied()),
        None => pool
            .iter()
            .find(|o| o.date.is_none())
            .or_else(|| pool.iter().max_by_key(|o| o.date))
            .copied(),
    };

    match chosen {
        Some(otf) => {
            debug!(path = %otf.path.display(), wavelength = wave, "Resolved OTF");
            Ok(otf.clone())
        }
        None => Err(OtfError::NotFound {
            wavelength: wave,
            dir: otf_dir.to_path_buf(),
        }),
    }
}

/// Split an OTF file name into wavelength, mask and date.
fn parse_otf_name(path: &Path) -> Option<(u32, Option<String>, Option<NaiveDate>)> {
    if path.extension()?.to_str()? != RAW_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let body = stem.strip_suffix(OTF_SUFFIX)?;
    let mut tokens = body.split('_');
    let wavelength: u32 = tokens.next()?.parse().ok()?;

    let mut date = None;
    let mut mask_parts = Vec::new();
    for token in tokens {
        match NaiveDate::parse_from_str(token, "%Y%m%d") {
            Ok(d) if token.len() == 8 => date = Some(d),
            _ => mask_parts.push(token),
        }
    }
    let mask = (!mask_parts.is_empty()).then(|| mask_parts.join("_"));
    Some((wavelength, mask, date))
}

/// Read a PSF file (header + `f32` samples).
pub fn read_psf(path: &Path) -> Result<Array3<f32>, OtfError> {
    let bytes = fs::read(path)?;
    let invalid = |reason: String| OtfError::Invalid {
        path: path.to_path_buf(),
        reason,
    };
    if bytes.len() < PSF_HEADER_BYTES {
        return Err(invalid("file too small for header".into()));
    }
    let nz = LittleEndian::read_u32(&bytes[0..4]) as usize;
    let ny = LittleEndian::read_u32(&bytes[4..8]) as usize;
    let nx = LittleEndian::read_u32(&bytes[8..12]) as usize;
    let (count, size) = nz
        .checked_mul(ny)
        .and_then(|n| n.checked_mul(nx))
        .and_then(|n| Some((n, n.checked_mul(4)?)))
        .ok_or_else(|| invalid(format!("PSF shape ({nz}, {ny}, {nx}) is too large")))?;
    if count == 0 {
        return Err(invalid(format!("empty PSF shape ({nz}, {ny}, {nx})")));
    }
    let body = &bytes[PSF_HEADER_BYTES..];
    if body.len() < size {
        return Err(invalid(format!(
            "expected {size} bytes of samples, got {}",
            body.len()
        )));
    }
    let mut samples = vec![0f32; count];
    LittleEndian::read_f32_into(&body[..size], &mut samples);
    Array3::from_shape_vec((nz, ny, nx), samples).map_err(|e| invalid(e.to_string()))
}

/// Write `psf` in the OTF file layout.
pub fn write_psf(path: &Path, psf: &Array3<f32>) -> Result<(), OtfError> {
    let (nz, ny, nx) = psf.dim();
    let mut bytes = vec![0u8; PSF_HEADER_BYTES + psf.len() * 4];
    LittleEndian::write_u32(&mut bytes[0..4], nz as u32);
    LittleEndian::write_u32(&mut bytes[4..8], ny as u32);
    LittleEndian::write_u32(&mut bytes[8..12], nx as u32);
    let samples: Vec<f32> = psf.iter().copied().collect();
    LittleEndian::write_f32_into(&samples, &mut bytes[PSF_HEADER_BYTES..]);
    fs::write(path, bytes)?;
    Ok(())
}
