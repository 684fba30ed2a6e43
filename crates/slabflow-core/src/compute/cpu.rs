use std::sync::Arc;

use ndarray::{s, Array3, ArrayView3, Axis, Zip};
use num_complex::Complex32;
use rustfft::{Fft, FftDirection, FftPlanner};
use tracing::debug;

use crate::consts::EPSILON;
use crate::error::ContextError;

use super::{ContextRequest, DeconBackend, DeconContext};

/// CPU backend: Richardson-Lucy with `rustfft`, lanes parallelized with Rayon.
pub struct CpuBackend;

impl DeconBackend for CpuBackend {
    fn name(&self) -> &str {
        "CPU/Rayon"
    }

    fn acquire(&self, request: &ContextRequest) -> Result<Box<dyn DeconContext>, ContextError> {
        let psf = request.otf.load_psf()?;
        let [nz, ny, nx] = request.shape;
        let (pz, py, px) = psf.dim();
        if pz > nz || py > ny || px > nx {
            return Err(ContextError::Device(format!(
                "PSF shape ({pz}, {py}, {px}) exceeds volume shape {:?}",
                request.shape
            )));
        }
        let total: f32 = psf.sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(ContextError::Device(format!(
                "PSF in {} does not have a positive sum",
                request.otf.path.display()
            )));
        }

        let fft = Fft3::new(request.shape);
        let transfer = psf_to_transfer(&psf, total, request.shape, &fft);

        let shift = if request.deskew {
            request.dz * request.angle.to_radians().cos() / request.dx
        } else {
            0.0
        };
        let natural_nx = nx + deskew_extent(nz, shift);
        let out_nx = if request.width > 0 {
            request.width
        } else {
            natural_nx
        };

        debug!(
            shape = ?request.shape,
            out_nx,
            otf = %request.otf.path.display(),
            "Acquired CPU deconvolution context"
        );

        Ok(Box::new(CpuContext {
            shape: request.shape,
            out_shape: vec![nz, ny, out_nx],
            transfer,
            shift,
            fft,
        }))
    }
}

struct CpuContext {
    shape: [usize; 3],
    out_shape: Vec<usize>,
    transfer: Array3<Complex32>,
    /// Deskew shear in X pixels per Z plane.
    shift: f64,
    fft: Fft3,
}

impl CpuContext {
    /// Circular convolution with the PSF (or correlation when `adjoint`).
    fn convolve(&self, data: &Array3<f32>, adjoint: bool) -> Array3<f32> {
        let mut spectrum = data.mapv(|v| Complex32::new(v, 0.0));
        self.fft.process(&mut spectrum, FftDirection::Forward);
        Zip::from(&mut spectrum)
            .and(&self.transfer)
            .par_for_each(|v, &h| *v *= if adjoint { h.conj() } else { h });
        self.fft.process(&mut spectrum, FftDirection::Inverse);
        spectrum.mapv(|v| v.re)
    }
}

impl DeconContext for CpuContext {
    fn out_shape(&self) -> &[usize] {
        &self.out_shape
    }

    fn deconvolve(
        &mut self,
        volume: ArrayView3<'_, f32>,
        iterations: usize,
    ) -> Result<Array3<f32>, ContextError> {
        let (nz, ny, nx) = volume.dim();
        if [nz, ny, nx] != self.shape {
            return Err(ContextError::ShapeMismatch {
                expected: self.shape.to_vec(),
                actual: volume.shape().to_vec(),
            });
        }

        let observed = volume.mapv(|v| v.max(0.0));
        let mut estimate = observed.clone();
        for _ in 0..iterations {
            let blurred = self.convolve(&estimate, false);
            let ratio = Zip::from(&observed)
                .and(&blurred)
                .map_collect(|&o, &b| o / (b + EPSILON));
            let correction = self.convolve(&ratio, true);
            estimate.zip_mut_with(&correction, |e, &c| *e = (*e * c).max(0.0));
        }

        let deskewed = if self.shift > 0.0 {
            deskew(&estimate, self.shift)
        } else {
            estimate
        };
        Ok(fit_width(deskewed, self.out_shape[2]))
    }
}

impl Drop for CpuContext {
    fn drop(&mut self) {
        debug!(shape = ?self.shape, "Released CPU deconvolution context");
    }
}

/// Number of extra X pixels a deskew with `shift` px/plane adds.
fn deskew_extent(nz: usize, shift: f64) -> usize {
    (nz.saturating_sub(1) as f64 * shift).ceil() as usize
}

/// Normalize `psf`, wrap its center to the origin and transform it.
fn psf_to_transfer(
    psf: &Array3<f32>,
    total: f32,
    shape: [usize; 3],
    fft: &Fft3,
) -> Array3<Complex32> {
    let [nz, ny, nx] = shape;
    let (pz, py, px) = psf.dim();
    let mut padded = Array3::<Complex32>::zeros((nz, ny, nx));
    for ((z, y, x), &v) in psf.indexed_iter() {
        let tz = (z + nz - pz / 2) % nz;
        let ty = (y + ny - py / 2) % ny;
        let tx = (x + nx - px / 2) % nx;
        padded[[tz, ty, tx]] = Complex32::new(v / total, 0.0);
    }
    fft.process(&mut padded, FftDirection::Forward);
    padded
}

/// Planned 1-D transforms for each axis of one volume shape.
struct Fft3 {
    forward: Vec<Arc<dyn Fft<f32>>>,
    inverse: Vec<Arc<dyn Fft<f32>>>,
}

impl Fft3 {
    fn new(shape: [usize; 3]) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            forward: shape.iter().map(|&n| planner.plan_fft_forward(n)).collect(),
            inverse: shape.iter().map(|&n| planner.plan_fft_inverse(n)).collect(),
        }
    }

    /// In-place 3-D FFT as three passes of 1-D transforms. The inverse is scaled.
    fn process(&self, data: &mut Array3<Complex32>, direction: FftDirection) {
        let plans = match direction {
            FftDirection::Forward => &self.forward,
            FftDirection::Inverse => &self.inverse,
        };
        for (axis, fft) in plans.iter().enumerate() {
            if data.len_of(Axis(axis)) < 2 {
                continue;
            }
            Zip::from(data.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
                let mut buffer: Vec<Complex32> = lane.iter().copied().collect();
                fft.process(&mut buffer);
                lane.iter_mut()
                    .zip(buffer)
                    .for_each(|(dst, src)| *dst = src);
            });
        }
        if direction == FftDirection::Inverse {
            let scale = 1.0 / data.len() as f32;
            data.mapv_inplace(|v| v * scale);
        }
    }
}

/// Shear each Z plane along X by `z * shift` pixels (linear interpolation).
fn deskew(volume: &Array3<f32>, shift: f64) -> Array3<f32> {
    let (nz, ny, nx) = volume.dim();
    let out_nx = nx + deskew_extent(nz, shift);
    let mut out = Array3::<f32>::zeros((nz, ny, out_nx));
    for z in 0..nz {
        let offset = z as f64 * shift;
        let whole = offset.floor() as usize;
        let frac = (offset - whole as f64) as f32;
        for y in 0..ny {
            for x in 0..nx {
                let v = volume[[z, y, x]];
                out[[z, y, x + whole]] += v * (1.0 - frac);
                if frac > 0.0 && x + whole + 1 < out_nx {
                    out[[z, y, x + whole + 1]] += v * frac;
                }
            }
        }
    }
    out
}

/// Center-crop or right-pad X to `width`.
fn fit_width(volume: Array3<f32>, width: usize) -> Array3<f32> {
    let (nz, ny, nx) = volume.dim();
    if width == nx {
        return volume;
    }
    if width < nx {
        let start = (nx - width) / 2;
        return volume.slice(s![.., .., start..start + width]).to_owned();
    }
    let mut out = Array3::<f32>::zeros((nz, ny, width));
    out.slice_mut(s![.., .., ..nx]).assign(&volume);
    out
}
