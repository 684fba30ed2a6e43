/// Default light-sheet angle (degrees) used for deskewing stage-scanned data.
pub const DEFAULT_DESKEW_ANGLE: f64 = 31.5;

/// Default number of Richardson-Lucy iterations.
pub const DEFAULT_RL_ITERATIONS: usize = 10;

/// Small epsilon to avoid division by zero in the Richardson-Lucy ratio.
pub const EPSILON: f32 = 1e-6;

/// Name of the acquisition settings file inside a stack directory.
pub const SETTINGS_FILE_NAME: &str = "acquisition.toml";

/// Extension of raw volume files (stack directories, OTFs, raw writer output).
pub const RAW_EXTENSION: &str = "raw";

/// Suffix that marks a file in the OTF directory as an OTF.
pub const OTF_SUFFIX: &str = "_otf";

/// Size of the (nz, ny, nx) header at the start of an OTF/PSF file.
pub const PSF_HEADER_BYTES: usize = 12;

/// Output sub-directory used by writers when no explicit directory is given.
pub const DEFAULT_OUTPUT_SUBDIR: &str = "processed";

/// Minimum element count to use Rayon in per-voxel stage kernels.
pub const PARALLEL_VOXEL_THRESHOLD: usize = 65_536;
