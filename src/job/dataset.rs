//! Item inputs from datasets and repeat counts

use super::item::ItemInput;
use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::path::Path;

/// Read dataset rows from a JSON array of objects or a JSONL file
///
/// Files ending in `.jsonl` or `.ndjson` are read line by line; blank lines
/// are skipped. Anything else must hold a single top-level array.
pub fn load_rows(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset {}", path.display()))?;

    let line_delimited = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "jsonl" | "ndjson"));

    let values: Vec<Value> = if line_delimited {
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))
            })
            .collect::<Result<_>>()?
    } else {
        match serde_json::from_str(&contents)
            .with_context(|| format!("parsing dataset {}", path.display()))?
        {
            Value::Array(values) => values,
            other => bail!(
                "dataset {} must be a JSON array of objects, found {}",
                path.display(),
                crate::engine::type_name(&other)
            ),
        }
    };

    let rows = values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::Object(row) => Ok(row),
            other => bail!(
                "dataset {} row {} is {}, expected an object",
                path.display(),
                index,
                crate::engine::type_name(&other)
            ),
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(path = %path.display(), rows = rows.len(), "Loaded dataset");
    Ok(rows)
}

/// One item per dataset row, in file order
pub fn rows_to_items(rows: Vec<Map<String, Value>>) -> Vec<ItemInput> {
    rows.into_iter()
        .enumerate()
        .map(|(index, bindings)| ItemInput::Row { index, bindings })
        .collect()
}

/// `count` repeat items, bounded by `cap`
pub fn repeat_items(count: usize, cap: usize) -> Result<Vec<ItemInput>> {
    if count == 0 {
        bail!("repeat count must be at least 1");
    }
    if count > cap {
        bail!("repeat count {} exceeds the cap of {}", count, cap);
    }
    Ok((0..count)
        .map(|iteration| ItemInput::Repeat { iteration })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(
            &path,
            r#"[{"question": "2+2?", "answerKey": "4"}, {"question": "3+3?", "answerKey": "6"}]"#,
        )
        .unwrap();

        let rows = load_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["answerKey"], "6");
    }

    #[test]
    fn test_load_jsonl_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(&path, "{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();

        let items = rows_to_items(load_rows(&path).unwrap());
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].bindings()["a"], 2);
        assert!(matches!(items[1], ItemInput::Row { index: 1, .. }));
    }

    #[test]
    fn test_jsonl_error_names_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(&path, "{\"a\": 1}\n{oops\n").unwrap();

        let err = load_rows(&path).unwrap_err();
        assert!(format!("{err}").contains("rows.jsonl:2"));
    }

    #[test]
    fn test_rejects_non_object_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(&path, "[{\"a\": 1}, 5]").unwrap();
        let err = load_rows(&path).unwrap_err();
        assert!(err.to_string().contains("row 1 is number"));

        fs::write(&path, "{\"a\": 1}").unwrap();
        assert!(load_rows(&path).unwrap_err().to_string().contains("JSON array"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_rows(Path::new("/nonexistent/rows.json")).unwrap_err();
        assert!(err.to_string().contains("reading dataset"));
    }

    #[test]
    fn test_repeat_bounds() {
        assert_eq!(repeat_items(3, 10).unwrap().len(), 3);
        assert!(repeat_items(0, 10).is_err());
        assert!(repeat_items(11, 10).is_err());
        assert_eq!(repeat_items(10, 10).unwrap()[9], ItemInput::Repeat { iteration: 9 });
    }
}
