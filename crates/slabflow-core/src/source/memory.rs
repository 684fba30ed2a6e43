use ndarray::{Array3, Array4, Axis};

use crate::error::SourceError;
use crate::slab::{Axes, Slab};

use super::{check_request, AcquisitionParams, DataSource};

/// Dataset held entirely in memory, one `CZYX` volume per timepoint.
pub struct InMemorySource {
    name: String,
    params: AcquisitionParams,
    volumes: Vec<Array4<f32>>,
}

impl InMemorySource {
    /// Wrap pre-built `CZYX` volumes. Their count and shape must agree with `params`.
    pub fn new(
        name: impl Into<String>,
        params: AcquisitionParams,
        volumes: Vec<Array4<f32>>,
    ) -> Result<Self, SourceError> {
        params.validate()?;
        if volumes.len() != params.nt {
            return Err(SourceError::Settings(format!(
                "{} volumes given for {} timepoints",
                volumes.len(),
                params.nt
            )));
        }
        let [nz, ny, nx] = params.shape;
        let expected = (params.nc, nz, ny, nx);
        if let Some(bad) = volumes.iter().find(|v| v.dim() != expected) {
            return Err(SourceError::Settings(format!(
                "volume shape {:?} does not match {:?}",
                bad.shape(),
                expected
            )));
        }
        Ok(Self {
            name: name.into(),
            params,
            volumes,
        })
    }

    /// Build every `(t, c)` volume with `make`, which must return `params.shape`.
    pub fn from_fn<F>(
        name: impl Into<String>,
        params: AcquisitionParams,
        make: F,
    ) -> Result<Self, SourceError>
    where
        F: Fn(usize, usize) -> Array3<f32>,
    {
        params.validate()?;
        let [nz, ny, nx] = params.shape;
        let mut volumes = Vec::with_capacity(params.nt);
        for t in 0..params.nt {
            let mut volume = Array4::<f32>::zeros((params.nc, nz, ny, nx));
            for c in 0..params.nc {
                let channel = make(t, c);
                if channel.dim() != (nz, ny, nx) {
                    return Err(SourceError::Settings(format!(
                        "generated volume shape {:?} does not match {:?}",
                        channel.shape(),
                        params.shape
                    )));
                }
                volume.index_axis_mut(Axis(0), c).assign(&channel);
            }
            volumes.push(volume);
        }
        Self::new(name, params, volumes)
    }
}

impl DataSource for InMemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn params(&self) -> &AcquisitionParams {
        &self.params
    }

    fn load_slab(&self, t: usize, channels: &[usize]) -> Result<Slab, SourceError> {
        check_request(&self.params, t, channels)?;
        let volume = &self.volumes[t];
        let data = if let [c] = channels {
            volume.index_axis(Axis(0), *c).to_owned().into_dyn()
        } else {
            let views: Vec<_> = channels
                .iter()
                .map(|&c| volume.index_axis(Axis(0), c))
                .collect();
            ndarray::stack(Axis(0), &views)
                .map_err(|e| SourceError::Settings(e.to_string()))?
                .into_dyn()
        };
        Ok(Slab::new(data, Axes::for_channels(channels.len())))
    }
}
