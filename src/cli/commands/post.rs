//! The `post` subcommand: fill in one template and submit it, or bulk-post
//! one form per row of a CSV file.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::Value;
use tracing::info;

use crate::client::AggregateClient;
use crate::error::{OdkError, Result};
use crate::xform::{FieldValue, XForm};

/// Arguments for posting forms.
#[derive(Args, Debug)]
pub struct PostArgs {
    /// XForm template file to post.
    #[arg(short = 'x', long, value_name = "FILE")]
    pub xform: PathBuf,

    /// Set the field NAME to VALUE before submission; a field FIELD inside a
    /// group GROUP is addressed as GROUP/FIELD. Repeatable.
    #[arg(short, long, num_args = 2, value_names = ["NAME", "VALUE"], action = clap::ArgAction::Append)]
    pub value: Vec<String>,

    /// Set the field NAME to the contents of FILE, for image and other
    /// binary fields. Repeatable.
    #[arg(short, long, num_args = 2, value_names = ["NAME", "FILE"], action = clap::ArgAction::Append)]
    pub file: Vec<String>,

    /// Read field values from a JSON object file; a string value naming an
    /// existing file becomes a file field. Repeatable; later files and
    /// subsequent --value/--file switches override.
    #[arg(short, long, value_name = "FILE", action = clap::ArgAction::Append)]
    pub json: Vec<PathBuf>,

    /// Bulk mode: the first CSV row names field paths, every further row is
    /// posted as one form instance. Ignores --value, --file and --json.
    #[arg(short, long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
}

/// Post a single form, or every row of the CSV file in bulk mode.
pub fn execute(client: &mut AggregateClient, args: &PostArgs) -> Result<()> {
    let template =
        fs::read_to_string(&args.xform).map_err(|e| OdkError::io_with_path(&args.xform, e))?;
    let mut form = XForm::new(&template)?;

    if let Some(csv_path) = &args.csv {
        return post_bulk(client, &form, &template, csv_path, &args.xform);
    }

    for path in &args.json {
        apply_json_defaults(&mut form, path)?;
    }
    for pair in args.value.chunks_exact(2) {
        form.set_field(&pair[0], pair[1].as_str())?;
    }
    for pair in args.file.chunks_exact(2) {
        form.set_file(&pair[0], Path::new(&pair[1]))?;
    }

    client.post_submission(&form.submission_parts()?)?;
    info!("successfully posted form {}", args.xform.display());
    Ok(())
}

fn post_bulk(
    client: &mut AggregateClient,
    form: &XForm,
    template: &str,
    csv_path: &Path,
    xform_path: &Path,
) -> Result<()> {
    let text = fs::read_to_string(csv_path).map_err(|e| OdkError::io_with_path(csv_path, e))?;
    let mut records = parse_csv(&text)?.into_iter();

    let Some((_, header)) = records.next() else {
        return Err(OdkError::csv(1, "file is empty"));
    };
    // Validate the whole header before posting anything.
    for name in &header {
        if !form.field_paths().iter().any(|p| p == name) {
            return Err(OdkError::field_not_found(name, form.name()));
        }
    }

    let mut posted = 0usize;
    for (line, row) in records {
        if row.len() != header.len() {
            return Err(OdkError::csv(
                line,
                format!("expected {} fields, got {}", header.len(), row.len()),
            ));
        }
        // A fresh parse per row gives every instance its own instanceID.
        let mut form = XForm::new(template)?;
        for (name, value) in header.iter().zip(&row) {
            form.set_field(name, value.as_str())?;
        }
        client.post_submission(&form.submission_parts()?)?;
        posted += 1;
        info!(
            "successfully posted form {} ({})",
            xform_path.display(),
            row.first().map(String::as_str).unwrap_or("")
        );
    }

    info!("posted {posted} forms from {}", csv_path.display());
    Ok(())
}

fn apply_json_defaults(form: &mut XForm, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|e| OdkError::io_with_path(path, e))?;
    let defaults: Value = serde_json::from_str(&text)?;
    let Value::Object(entries) = defaults else {
        return Err(OdkError::Json {
            message: format!("{} must hold a JSON object", path.display()),
            source: None,
        });
    };
    for (name, value) in entries {
        match value {
            Value::String(s) if Path::new(&s).is_file() => {
                form.set_file(&name, Path::new(&s))?;
            }
            other => {
                form.set_field(&name, json_field_value(&name, other)?)?;
            }
        }
    }
    Ok(())
}

fn json_field_value(path: &str, value: Value) -> Result<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(FieldValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(FieldValue::Float(f))
            } else {
                Err(OdkError::unconvertible(path, format!("number {n} out of range")))
            }
        }
        Value::String(s) => Ok(FieldValue::Text(s)),
        Value::Array(_) => Err(OdkError::unconvertible(
            path,
            "JSON arrays have no field representation",
        )),
        Value::Object(_) => Err(OdkError::unconvertible(
            path,
            "JSON objects have no field representation",
        )),
    }
}

/// Minimal CSV reader: comma separated, double-quoted fields with doubled
/// quote escapes, LF or CRLF record ends. Returns each record with the
/// 1-based line it starts on.
fn parse_csv(text: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut line = 1usize;
    let mut record_line = 1usize;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                '\n' => {
                    field.push(c);
                    line += 1;
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' if field.is_empty() => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                '\r' => {}
                '\n' => {
                    line += 1;
                    fields.push(std::mem::take(&mut field));
                    records.push((record_line, std::mem::take(&mut fields)));
                    record_line = line;
                }
                _ => field.push(c),
            }
        }
    }

    if in_quotes {
        return Err(OdkError::csv(record_line, "unterminated quoted field"));
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push((record_line, fields));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = r#"<h:html><h:head><model><instance>
        <data id="t1">
            <name/>
            <photo/>
            <meta><instanceID/></meta>
        </data>
    </instance></model></h:head></h:html>"#;

    fn record(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_plain_csv() {
        let records = parse_csv("name,age\nAlice,30\nBob,41\n").unwrap();
        assert_eq!(
            records,
            vec![
                (1, record(&["name", "age"])),
                (2, record(&["Alice", "30"])),
                (3, record(&["Bob", "41"])),
            ]
        );
    }

    #[test]
    fn parses_csv_without_trailing_newline() {
        let records = parse_csv("a,b\r\n1,2").unwrap();
        assert_eq!(records, vec![(1, record(&["a", "b"])), (2, record(&["1", "2"]))]);
    }

    #[test]
    fn parses_quoted_fields() {
        let records = parse_csv("a,b\n\"x,y\",\"he said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(records[1].1, record(&["x,y", "he said \"hi\""]));
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let records = parse_csv("a\n\"first\nsecond\"\nlast\n").unwrap();
        assert_eq!(records[1], (2, record(&["first\nsecond"])));
        // The record after the multi-line field starts on the right line.
        assert_eq!(records[2], (4, record(&["last"])));
    }

    #[test]
    fn rejects_unterminated_quote() {
        let err = parse_csv("a\n\"oops").unwrap_err();
        assert!(matches!(err, OdkError::Csv { line: 2, .. }));
    }

    #[test]
    fn converts_json_scalars() {
        assert_eq!(
            json_field_value("f", Value::from(30)).unwrap(),
            FieldValue::Int(30)
        );
        assert_eq!(
            json_field_value("f", Value::from(36.6)).unwrap(),
            FieldValue::Float(36.6)
        );
        assert_eq!(
            json_field_value("f", Value::from(true)).unwrap(),
            FieldValue::Text("true".to_string())
        );
        assert_eq!(json_field_value("f", Value::Null).unwrap(), FieldValue::Null);
    }

    #[test]
    fn rejects_json_composites() {
        let err = json_field_value("f", serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, OdkError::UnconvertibleValue { .. }));
        let err = json_field_value("f", serde_json::json!({"a": 1})).unwrap_err();
        assert!(matches!(err, OdkError::UnconvertibleValue { .. }));
    }

    #[test]
    fn json_defaults_set_fields_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("shot.png");
        fs::write(&photo, b"png").unwrap();

        let defaults = dir.path().join("defaults.json");
        fs::write(
            &defaults,
            format!(
                "{{\"name\": \"Alice\", \"photo\": \"{}\"}}",
                photo.display()
            ),
        )
        .unwrap();

        let mut form = XForm::new(TEMPLATE).unwrap();
        apply_json_defaults(&mut form, &defaults).unwrap();

        assert_eq!(form.value("name"), Some("Alice"));
        assert_eq!(form.value("photo"), Some("shot.png"));
        let parts = form.submission_parts().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].content_type, "image/png");
    }

    #[test]
    fn json_defaults_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.json");
        fs::write(&defaults, "[1, 2]").unwrap();

        let mut form = XForm::new(TEMPLATE).unwrap();
        let err = apply_json_defaults(&mut form, &defaults).unwrap_err();
        assert!(matches!(err, OdkError::Json { .. }));
    }
}
