use crate::model_service::ClassNames;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid labels line {line}: {content:?}")]
    InvalidLine { line: usize, content: String },
}

/// Loads class names, one per line. The line index (blank lines excluded) is
/// the class id. Lines may carry extra comma separated columns, as in
/// `scratch,255,0,0`; only the first one is read.
pub fn load_class_names(path: &Path) -> Result<ClassNames, LabelsError> {
    let file = File::open(path)?;
    parse_class_names(io::BufReader::new(file))
}

pub fn parse_class_names(reader: impl BufRead) -> Result<ClassNames, LabelsError> {
    let mut names = ClassNames::new();

    for (line_number, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let name = line.split(',').next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(LabelsError::InvalidLine {
                line: line_number + 1,
                content: line,
            });
        }

        let class_id = names.len() as i32;
        names.insert(class_id, name.to_string());
    }

    Ok(names)
}
