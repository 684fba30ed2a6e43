use std::fs::{self, File};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use ndarray::{Array3, Array4, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{RAW_EXTENSION, SETTINGS_FILE_NAME};
use crate::error::SourceError;
use crate::slab::{Axes, Slab};

use super::{check_request, AcquisitionParams, DataSource};

/// Sample encoding of the raw volume files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    U16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Contents of `acquisition.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackSettings {
    #[serde(flatten)]
    pub params: AcquisitionParams,
    #[serde(default)]
    pub sample_format: SampleFormat,
}

/// Directory of raw volumes: `acquisition.toml` plus one
/// `ch{c}_t{tttt}.raw` file per channel and timepoint.
pub struct StackDir {
    root: PathBuf,
    settings: StackSettings,
}

impl StackDir {
    /// Open a stack directory and parse its settings file.
    pub fn open(root: &Path) -> Result<Self, SourceError> {
        let settings_path = root.join(SETTINGS_FILE_NAME);
        let text = fs::read_to_string(&settings_path).map_err(|source| SourceError::Io {
            path: settings_path.clone(),
            source,
        })?;
        let settings: StackSettings =
            toml::from_str(&text).map_err(|e| SourceError::Settings(e.to_string()))?;
        settings.params.validate()?;
        debug!(
            root = %root.display(),
            nt = settings.params.nt,
            nc = settings.params.nc,
            "Opened stack directory"
        );
        Ok(Self {
            root: root.to_path_buf(),
            settings,
        })
    }

    /// File name of the volume for channel `c` at timepoint `t`.
    pub fn volume_file_name(c: usize, t: usize) -> String {
        format!("ch{c}_t{t:04}.{RAW_EXTENSION}")
    }

    pub fn volume_path(&self, c: usize, t: usize) -> PathBuf {
        self.root.join(Self::volume_file_name(c, t))
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.settings.sample_format
    }

    fn read_volume(&self, c: usize, t: usize) -> Result<Array3<f32>, SourceError> {
        let path = self.volume_path(c, t);
        let io_err = |source: std::io::Error| SourceError::Io {
            path: path.clone(),
            source,
        };
        let file = File::open(&path).map_err(io_err)?;
        let mmap = unsafe { Mmap::map(&file).map_err(io_err)? };

        let [nz, ny, nx] = self.settings.params.shape;
        let count = nz * ny * nx;
        let format = self.settings.sample_format;
        let expected = count * format.bytes_per_sample();
        if mmap.len() < expected {
            return Err(SourceError::Truncated {
                path,
                expected,
                actual: mmap.len(),
            });
        }

        let mut samples = vec![0f32; count];
        match format {
            SampleFormat::U16 => {
                let mut raw = vec![0u16; count];
                LittleEndian::read_u16_into(&mmap[..expected], &mut raw);
                for (dst, src) in samples.iter_mut().zip(raw) {
                    *dst = src as f32;
                }
            }
            SampleFormat::F32 => LittleEndian::read_f32_into(&mmap[..expected], &mut samples),
        }

        Array3::from_shape_vec((nz, ny, nx), samples)
            .map_err(|e| SourceError::Settings(e.to_string()))
    }
}

impl DataSource for StackDir {
    fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn params(&self) -> &AcquisitionParams {
        &self.settings.params
    }

    fn load_slab(&self, t: usize, channels: &[usize]) -> Result<Slab, SourceError> {
        check_request(&self.settings.params, t, channels)?;
        let data = if let [c] = channels {
            self.read_volume(*c, t)?.into_dyn()
        } else {
            let [nz, ny, nx] = self.settings.params.shape;
            let mut stacked = Array4::<f32>::zeros((channels.len(), nz, ny, nx));
            for (i, &c) in channels.iter().enumerate() {
                stacked.index_axis_mut(Axis(0), i).assign(&self.read_volume(c, t)?);
            }
            stacked.into_dyn()
        };
        Ok(Slab::new(data, Axes::for_channels(channels.len())))
    }
}
