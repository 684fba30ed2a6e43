use std::sync::Arc;

use anyhow::Result;
use slabflow_core::compute::CpuBackend;
use slabflow_core::stages::builtin_registry;

use crate::summary::print_stage_list;

pub fn run() -> Result<()> {
    let registry = builtin_registry(Arc::new(CpuBackend));
    print_stage_list(registry.iter());
    Ok(())
}
