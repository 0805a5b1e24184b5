use std::{
    fs::File,
    io::{BufReader, BufWriter, Write as _},
    path::Path,
};

use crate::{
    error::{LayerfoldError, LayerfoldResult},
    model::Scene,
};

pub fn read_scene_json(path: &Path) -> LayerfoldResult<Scene> {
    let f = File::open(path)
        .map_err(|e| LayerfoldError::io(format!("open scene '{}': {e}", path.display())))?;
    let scene: Scene = serde_json::from_reader(BufReader::new(f))
        .map_err(|e| LayerfoldError::serde(format!("parse scene JSON: {e}")))?;
    Ok(scene)
}

pub fn write_scene_json(scene: &Scene, path: &Path) -> LayerfoldResult<()> {
    let f = File::create(path)
        .map_err(|e| LayerfoldError::io(format!("create scene '{}': {e}", path.display())))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, scene)
        .map_err(|e| LayerfoldError::serde(format!("write scene JSON: {e}")))?;
    w.write_all(b"\n")
        .and_then(|_| w.flush())
        .map_err(|e| LayerfoldError::io(format!("write scene '{}': {e}", path.display())))?;
    Ok(())
}
