use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use image::{ImageBuffer, ImageFormat, Luma};
use ndarray::{ArrayD, ArrayView2, ArrayViewD, Axis, Ix2};
use tracing::debug;

use crate::compute::DeviceScope;
use crate::consts::{DEFAULT_OUTPUT_SUBDIR, RAW_EXTENSION};
use crate::error::StageError;
use crate::meta::Meta;
use crate::slab::channel_views;
use crate::source::DataSource;
use crate::stage::{ParamDefault, ParamReader, ParamSpec, Params, Stage, StageFactory, StageKind};

const PARAMS: &[ParamSpec] = &[
    ParamSpec::new(
        "output_dir",
        ParamDefault::Text(""),
        "output directory (default: 'processed' inside the source)",
    ),
    ParamSpec::new("prefix", ParamDefault::Text(""), "file name prefix"),
];

/// On-disk format of a writer stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// 16-bit grayscale TIFF, one file per Z plane.
    Tiff,
    /// `(nz, ny, nx)` little-endian `u32` header followed by `f32` samples.
    Raw,
}

impl OutputFormat {
    fn stage_name(self) -> &'static str {
        match self {
            Self::Tiff => "tiff_writer",
            Self::Raw => "raw_writer",
        }
    }
}

/// Writer stage type for one [`OutputFormat`].
pub struct WriterFactory {
    format: OutputFormat,
}

impl WriterFactory {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl StageFactory for WriterFactory {
    fn name(&self) -> &str {
        self.format.stage_name()
    }

    fn kind(&self) -> StageKind {
        StageKind::Writer
    }

    fn parameters(&self) -> &[ParamSpec] {
        PARAMS
    }

    fn description(&self) -> &str {
        match self.format {
            OutputFormat::Tiff => "Write each channel as 16-bit TIFF planes",
            OutputFormat::Raw => "Write each channel as a raw f32 volume",
        }
    }

    fn from_data_source(
        &self,
        source: &dyn DataSource,
        params: &Params,
    ) -> Result<Box<dyn Stage>, StageError> {
        let reader = ParamReader::new(params, PARAMS);
        let requested = reader.text("output_dir")?;
        let dir = if requested.is_empty() {
            source
                .location()
                .map(|root| root.join(DEFAULT_OUTPUT_SUBDIR))
                .ok_or_else(|| {
                    StageError::invalid("output_dir", "required for sources without a location")
                })?
        } else {
            PathBuf::from(requested)
        };
        Ok(Box::new(Writer {
            format: self.format,
            dir,
            prefix: reader.text("prefix")?,
        }))
    }
}

struct Writer {
    format: OutputFormat,
    dir: PathBuf,
    prefix: String,
}

impl Writer {
    fn write_channel(&self, view: ArrayViewD<'_, f32>, stem: &str) -> Result<PathBuf, StageError> {
        match self.format {
            OutputFormat::Tiff => match view.ndim() {
                2 => {
                    let path = self.dir.join(format!("{stem}.tif"));
                    write_tiff_plane(as_plane(view)?, &path)?;
                    Ok(path)
                }
                3 => {
                    for (z, plane) in view.axis_iter(Axis(0)).enumerate() {
                        let path = self.dir.join(format!("{stem}_z{z:03}.tif"));
                        write_tiff_plane(as_plane(plane)?, &path)?;
                    }
                    Ok(self.dir.join(format!("{stem}_z000.tif")))
                }
                _ => Err(unsupported(&view)),
            },
            OutputFormat::Raw => {
                let path = self.dir.join(format!("{stem}.{RAW_EXTENSION}"));
                write_raw_volume(view, &path)?;
                Ok(path)
            }
        }
    }
}

fn unsupported(view: &ArrayViewD<'_, f32>) -> StageError {
    StageError::Shape {
        shape: view.shape().to_vec(),
        reason: "writers accept 2-D or 3-D data per channel".into(),
    }
}

fn as_plane<'a>(view: ArrayViewD<'a, f32>) -> Result<ArrayView2<'a, f32>, StageError> {
    let shape = view.shape().to_vec();
    view.into_dimensionality::<Ix2>().map_err(|_| StageError::Shape {
        shape,
        reason: "expected a 2-D plane".into(),
    })
}

/// Save a plane as 16-bit grayscale TIFF. Values are rounded and clamped.
fn write_tiff_plane(plane: ArrayView2<'_, f32>, path: &Path) -> Result<(), StageError> {
    let (h, w) = plane.dim();
    let pixels: Vec<u16> = plane
        .iter()
        .map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16)
        .collect();
    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| StageError::Message(format!("cannot build a {w}x{h} image buffer")))?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a 2-D or 3-D array with a `(nz, ny, nx)` header; planes get `nz = 1`.
fn write_raw_volume(view: ArrayViewD<'_, f32>, path: &Path) -> Result<(), StageError> {
    let dims: [usize; 3] = match *view.shape() {
        [ny, nx] => [1, ny, nx],
        [nz, ny, nx] => [nz, ny, nx],
        _ => return Err(unsupported(&view)),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    for d in dims {
        writer.write_u32::<LittleEndian>(d as u32)?;
    }
    for &v in view.iter() {
        writer.write_f32::<LittleEndian>(v)?;
    }
    writer.flush()?;
    Ok(())
}

impl Stage for Writer {
    fn name(&self) -> &str {
        self.format.stage_name()
    }

    fn verb(&self) -> &str {
        "Writing"
    }

    fn kind(&self) -> StageKind {
        StageKind::Writer
    }

    fn setup_t(&mut self, _data: &ArrayD<f32>, _meta: &Meta) -> Result<(), StageError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn process(
        &mut self,
        data: ArrayD<f32>,
        meta: &mut Meta,
        _scope: &mut DeviceScope,
    ) -> Result<ArrayD<f32>, StageError> {
        let t = meta.current_t()?;
        let views = channel_views(&data, meta.current_axes()?);
        let mut last = None;
        for (i, view) in views.into_iter().enumerate() {
            let c = meta.channels.get(i).copied().unwrap_or(i);
            let stem = format!("{}ch{c}_t{t:04}", self.prefix);
            let path = self.write_channel(view, &stem)?;
            debug!(path = %path.display(), "Wrote channel");
            last = Some(path);
        }
        if let Some(path) = last {
            meta.insert("last_output", path.display().to_string());
        }
        Ok(data)
    }
}
