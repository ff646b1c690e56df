pub mod config;
pub mod instances;
pub mod run;
pub mod scan;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
