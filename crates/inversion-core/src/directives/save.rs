// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Output Directives
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use inversion_types::config::SaveOutputParams;
use inversion_types::error::{InversionError, InversionResult};
use ndarray::Array1;

use super::{Directive, DirectiveContext};

pub const OUTPUT_NAME: &str = "save_output";
pub const MODEL_NAME: &str = "save_model";

fn checked_path(params: SaveOutputParams, kind: &str) -> InversionResult<PathBuf> {
    if params.path.trim().is_empty() {
        return Err(InversionError::ConfigError(format!("{kind}.path must be non-empty")));
    }
    Ok(PathBuf::from(params.path))
}

// ───────────────────────────── history ───────────────────────────────

/// Appends each iteration record as one JSON line. The file is truncated
/// when the run starts.
#[derive(Debug, Clone)]
pub struct SaveOutputEveryIteration {
    path: PathBuf,
}

impl SaveOutputEveryIteration {
    pub fn new(params: SaveOutputParams) -> InversionResult<Self> {
        Ok(SaveOutputEveryIteration {
            path: checked_path(params, OUTPUT_NAME)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Directive for SaveOutputEveryIteration {
    fn name(&self) -> &'static str {
        OUTPUT_NAME
    }

    fn after_initialize(&mut self, _ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        File::create(&self.path)?;
        Ok(())
    }

    fn after_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        let Some(record) = ctx.history.last() else {
            return Ok(());
        };
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

// ───────────────────────────── models ────────────────────────────────

/// Writes `model_NNN.npy` into a directory after initialisation (NNN = 000)
/// and after every accepted iteration.
#[derive(Debug, Clone)]
pub struct SaveModelEveryIteration {
    dir: PathBuf,
}

impl SaveModelEveryIteration {
    pub fn new(params: SaveOutputParams) -> InversionResult<Self> {
        Ok(SaveModelEveryIteration {
            dir: checked_path(params, MODEL_NAME)?,
        })
    }

    pub fn model_path(&self, iteration: usize) -> PathBuf {
        self.dir.join(format!("model_{iteration:03}.npy"))
    }

    fn write(&self, model: &Array1<f64>, iteration: usize) -> InversionResult<()> {
        let path = self.model_path(iteration);
        ndarray_npy::write_npy(&path, model).map_err(|e| {
            InversionError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("writing {}: {e}", path.display()),
            ))
        })
    }
}

impl Directive for SaveModelEveryIteration {
    fn name(&self) -> &'static str {
        MODEL_NAME
    }

    fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        fs::create_dir_all(&self.dir)?;
        self.write(&ctx.state.model, 0)
    }

    fn after_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.write(&ctx.state.model, ctx.state.iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::fixtures::diagonal_problem;
    use inversion_types::state::IterationRecord;
    use ndarray_npy::read_npy;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("inversion_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_history_written_as_json_lines() {
        let dir = scratch("history");
        let path = dir.join("history.jsonl");
        let mut d = SaveOutputEveryIteration::new(SaveOutputParams {
            path: path.to_string_lossy().to_string(),
        })
        .unwrap();
        let (mut objective, mut state) = diagonal_problem(1.0, 1.0);
        let history = vec![
            IterationRecord {
                iteration: 1,
                beta: 2.0,
                ..IterationRecord::default()
            },
            IterationRecord {
                iteration: 2,
                beta: 1.0,
                ..IterationRecord::default()
            },
        ];
        let mut ctx = DirectiveContext {
            objective: &mut objective,
            state: &mut state,
            history: &history[..1],
        };
        d.after_initialize(&mut ctx).unwrap();
        d.after_iteration(&mut ctx).unwrap();
        ctx.history = &history[..2];
        d.after_iteration(&mut ctx).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let rows: Vec<IterationRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].iteration, 2);
        assert_eq!(rows[0].beta, 2.0);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_models_written_as_npy() {
        let dir = scratch("models");
        let mut d = SaveModelEveryIteration::new(SaveOutputParams {
            path: dir.to_string_lossy().to_string(),
        })
        .unwrap();
        let (mut objective, mut state) = diagonal_problem(1.0, 1.0);
        let mut ctx = DirectiveContext {
            objective: &mut objective,
            state: &mut state,
            history: &[],
        };
        d.after_initialize(&mut ctx).unwrap();
        ctx.state.model = ndarray::array![1.0, 2.0, 3.0];
        ctx.state.iteration = 1;
        d.after_iteration(&mut ctx).unwrap();

        let m0: Array1<f64> = read_npy(d.model_path(0)).unwrap();
        let m1: Array1<f64> = read_npy(d.model_path(1)).unwrap();
        assert_eq!(m0, Array1::<f64>::zeros(3));
        assert_eq!(m1, ndarray::array![1.0, 2.0, 3.0]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(SaveModelEveryIteration::new(SaveOutputParams {
            path: "  ".to_string()
        })
        .is_err());
    }
}
