//! XForm template handling: parse, fill in, serialize.
//!
//! Only the slice of the XForm standard needed for submissions is
//! implemented: locating the instance data block, addressing its fields by
//! slash-joined paths, and producing the instance document Aggregate expects
//! as the first multipart part.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;
use uuid::Uuid;

use crate::error::{OdkError, Result};
use crate::multipart::SubmissionPart;

/// Fixed descent from the document root to the instance container.
const INSTANCE_CONTAINER: [&str; 4] = ["h:html", "h:head", "model", "instance"];

/// Field that receives a fresh instance id, set on construction and reset.
const INSTANCE_ID_FIELD: &str = "meta/instanceID";

/// Content type used when nothing can be inferred from a file extension.
const FALLBACK_CONTENT_TYPE: &str = "application/binary";

/// Part name Aggregate expects the instance document under.
const SUBMISSION_PART_NAME: &str = "xml_submission_file";

// ─────────────────────────────────────────────────────────────
// Field values
// ─────────────────────────────────────────────────────────────

/// A value accepted by [`XForm::set_field`], converted to canonical text at
/// set time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Used as-is.
    Text(String),
    /// Rendered with the default integer formatting.
    Int(i64),
    /// Rendered with the default float formatting.
    Float(f64),
    /// Rendered as `YYYY-MM-DD`.
    Date(NaiveDate),
    /// Rendered as `HH:MM:SS.0`.
    Time(NaiveTime),
    /// Rendered as `YYYY-MM-DD HH:MM:SS.0`.
    DateTime(NaiveDateTime),
    /// Leaves the field unset; the path is still validated.
    Null,
}

impl FieldValue {
    fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Some(t.format("%H:%M:%S.0").to_string()),
            Self::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S.0").to_string()),
            Self::Null => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveTime> for FieldValue {
    fn from(value: NaiveTime) -> Self {
        Self::Time(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

// ─────────────────────────────────────────────────────────────
// Template tree
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn synthetic_root() -> Self {
        Self {
            name: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Attachment {
    field: String,
    path: PathBuf,
    basename: String,
    content_type: String,
}

/// A parsed XForm template plus the values and attachments of the instance
/// being prepared.
///
/// The template tree is immutable after parse; per-instance state lives in
/// the value map and the attachment list, so serialization never mutates the
/// template and [`XForm::reset`] restores a pristine instance.
#[derive(Debug, Clone)]
pub struct XForm {
    name: String,
    form_id: String,
    template: Element,
    paths: Vec<String>,
    values: HashMap<String, String>,
    attachments: Vec<Attachment>,
}

impl XForm {
    /// Parse a template from its XML text.
    ///
    /// The document must contain the `h:html`/`h:head`/`model`/`instance`
    /// structure with each step unique, and the instance container must hold
    /// exactly one element child carrying an `id` attribute. Anything else
    /// is [`OdkError::MalformedTemplate`]; picking an arbitrary candidate
    /// among several is never done.
    pub fn new(xml: &str) -> Result<Self> {
        let document = parse_document(xml)?;
        let container = descend(&document, &INSTANCE_CONTAINER)?;

        if container.children.len() != 1 {
            return Err(OdkError::template("no unique form instance found"));
        }
        let template = container.children[0].clone();
        let name = template.name.clone();
        let form_id = template
            .attributes
            .iter()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                OdkError::template(format!("instance \"{name}\" has no id attribute"))
            })?;

        let mut paths = Vec::new();
        collect_paths(&template, "", &mut paths);

        let mut form = Self {
            name,
            form_id,
            template,
            paths,
            values: HashMap::new(),
            attachments: Vec::new(),
        };
        form.fresh_instance_id()?;

        debug!(
            "loaded XForm {} \"{}\": {} paths",
            form.name,
            form.form_id,
            form.paths.len()
        );
        Ok(form)
    }

    /// Instance root element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the instance root's `id` attribute.
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    /// All settable field paths, in document pre-order, root excluded.
    pub fn field_paths(&self) -> &[String] {
        &self.paths
    }

    /// Current text of a field, if set.
    pub fn value(&self, path: &str) -> Option<&str> {
        self.values.get(path).map(String::as_str)
    }

    /// Set a field to a value.
    ///
    /// The path must be one of [`XForm::field_paths`] no matter the value;
    /// [`FieldValue::Null`] then leaves the field unset. Setting a path
    /// twice overwrites.
    pub fn set_field(&mut self, path: &str, value: impl Into<FieldValue>) -> Result<()> {
        if !self.paths.iter().any(|p| p == path) {
            return Err(OdkError::field_not_found(path, &self.name));
        }
        let Some(text) = value.into().into_text() else {
            return Ok(());
        };
        debug!("setting {}[{path}] = {text}", self.form_id);
        self.values.insert(path.to_string(), text);
        Ok(())
    }

    /// Set a file field, inferring the content type from the extension and
    /// falling back to a generic binary type.
    pub fn set_file(&mut self, field: &str, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        let content_type = mime_guess::from_path(file)
            .first_raw()
            .unwrap_or(FALLBACK_CONTENT_TYPE);
        self.set_file_as(field, file, content_type)
    }

    /// Set a file field with an explicit content type.
    ///
    /// The field's value becomes the file's base name; the file itself is
    /// read when submission parts are built, not here.
    pub fn set_file_as(
        &mut self,
        field: &str,
        file: impl AsRef<Path>,
        content_type: impl Into<String>,
    ) -> Result<()> {
        let file = file.as_ref();
        let basename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                OdkError::io_with_path(
                    file,
                    std::io::Error::new(ErrorKind::InvalidInput, "path has no file name"),
                )
            })?;
        self.set_field(field, basename.as_str())?;

        let content_type = content_type.into();
        debug!("attached {} as {content_type}", file.display());
        let attachment = Attachment {
            field: field.to_string(),
            path: file.to_path_buf(),
            basename,
            content_type,
        };
        match self.attachments.iter_mut().find(|a| a.field == field) {
            Some(existing) => *existing = attachment,
            None => self.attachments.push(attachment),
        }
        Ok(())
    }

    /// Clear all values and attachments and draw a fresh instance id.
    pub fn reset(&mut self) -> Result<()> {
        self.values.clear();
        self.attachments.clear();
        self.fresh_instance_id()
    }

    fn fresh_instance_id(&mut self) -> Result<()> {
        self.set_field(INSTANCE_ID_FIELD, format!("uuid:{}", Uuid::new_v4()))
    }

    /// Serialize the instance document.
    ///
    /// Only the instance root is emitted, prefixed with an XML declaration.
    /// The root keeps its attributes; every other element is written bare,
    /// and field values land as text after an element's children.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_element(&mut writer, &self.template, "", true)?;
        let body = String::from_utf8(writer.into_inner())
            .map_err(|e| OdkError::template(format!("serialized form is not valid UTF-8: {e}")))?;
        Ok(format!("<?xml version=\"1.0\" ?>{body}"))
    }

    fn write_element(
        &self,
        writer: &mut Writer<Vec<u8>>,
        element: &Element,
        path: &str,
        is_root: bool,
    ) -> Result<()> {
        let mut start = BytesStart::new(element.name.as_str());
        if is_root {
            for (key, value) in &element.attributes {
                start.push_attribute((key.as_str(), value.as_str()));
            }
        }

        let text = if path.is_empty() {
            None
        } else {
            self.values.get(path)
        };

        if element.children.is_empty() && text.is_none() {
            write_event(writer, Event::Empty(start))?;
            return Ok(());
        }

        write_event(writer, Event::Start(start))?;
        for child in &element.children {
            let child_path = if path.is_empty() {
                child.name.clone()
            } else {
                format!("{path}/{}", child.name)
            };
            self.write_element(writer, child, &child_path, false)?;
        }
        if let Some(text) = text {
            write_event(writer, Event::Text(BytesText::new(text)))?;
        }
        write_event(writer, Event::End(BytesEnd::new(element.name.as_str())))
    }

    /// Build the positional parts of one submission: the instance document
    /// first, then every attachment read fully into memory.
    pub fn submission_parts(&self) -> Result<Vec<SubmissionPart>> {
        let content = self.to_xml()?;
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");

        let mut parts = vec![SubmissionPart::new(
            SUBMISSION_PART_NAME,
            format!("{}_{timestamp}.xml", self.form_id),
            content.into_bytes(),
            "text/xml",
        )];
        for attachment in &self.attachments {
            let content = fs::read(&attachment.path)
                .map_err(|e| OdkError::io_with_path(&attachment.path, e))?;
            parts.push(SubmissionPart::new(
                attachment.basename.as_str(),
                attachment.basename.as_str(),
                content,
                attachment.content_type.as_str(),
            ));
        }
        Ok(parts)
    }
}

// ─────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────

fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![Element::synthetic_root()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from(&e)?),
            Ok(Event::Empty(e)) => {
                let element = element_from(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Err(OdkError::template("unexpected closing tag")),
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| OdkError::template("unexpected closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Err(OdkError::template("unexpected closing tag")),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(OdkError::template(format!("could not parse XML: {e}"))),
        }
    }

    if stack.len() != 1 {
        return Err(OdkError::template("unexpected end of document"));
    }
    Ok(stack.remove(0))
}

fn element_from(start: &BytesStart<'_>) -> Result<Element> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| OdkError::template("element name is not valid UTF-8"))?
        .to_string();

    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| OdkError::template(format!("bad attribute: {e}")))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|_| OdkError::template("attribute name is not valid UTF-8"))?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| OdkError::template(format!("bad attribute value: {e}")))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

/// Walk a fixed element path, requiring each step to match exactly one child.
fn descend<'a>(root: &'a Element, steps: &[&str]) -> Result<&'a Element> {
    let mut node = root;
    for step in steps {
        let mut matches = node.children.iter().filter(|c| c.name == *step);
        let first = matches
            .next()
            .ok_or_else(|| OdkError::template(format!("element \"{step}\" not found")))?;
        if matches.next().is_some() {
            return Err(OdkError::template(format!("element \"{step}\" not unique")));
        }
        node = first;
    }
    Ok(node)
}

fn collect_paths(element: &Element, prefix: &str, out: &mut Vec<String>) {
    for child in &element.children {
        let path = if prefix.is_empty() {
            child.name.clone()
        } else {
            format!("{prefix}/{}", child.name)
        };
        out.push(path.clone());
        collect_paths(child, &path, out);
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| OdkError::template(format!("could not serialize XML: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = r#"<?xml version="1.0"?>
<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml">
  <h:head>
    <h:title>Patient intake</h:title>
    <model>
      <instance>
        <data id="intake1">
          <info>
            <name/>
            <age/>
          </info>
          <visit_date default="today"/>
          <xray_image/>
          <meta>
            <instanceID/>
          </meta>
        </data>
      </instance>
      <bind nodeset="/data/info/name" type="string"/>
    </model>
  </h:head>
  <h:body/>
</h:html>"#;

    #[test]
    fn parses_template_and_collects_paths() {
        let form = XForm::new(TEMPLATE).unwrap();
        assert_eq!(form.name(), "data");
        assert_eq!(form.form_id(), "intake1");
        let paths: Vec<&str> = form.field_paths().iter().map(String::as_str).collect();
        assert_eq!(
            paths,
            [
                "info",
                "info/name",
                "info/age",
                "visit_date",
                "xray_image",
                "meta",
                "meta/instanceID",
            ]
        );
        let instance_id = form.value("meta/instanceID").unwrap();
        assert!(instance_id.starts_with("uuid:"));
        assert!(instance_id.len() > "uuid:".len());
    }

    #[test]
    fn field_paths_are_stable_across_reparses() {
        let first = XForm::new(TEMPLATE).unwrap();
        let second = XForm::new(TEMPLATE).unwrap();
        assert_eq!(first.field_paths(), second.field_paths());
    }

    #[test]
    fn set_and_serialize_roundtrip() {
        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_field("info/name", "Alice").unwrap();
        form.set_field("info/age", 30).unwrap();

        let xml = form.to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" ?>"));
        assert!(xml.contains("<data id=\"intake1\">"));
        assert!(xml.contains("<info><name>Alice</name><age>30</age></info>"));
        assert!(xml.contains("<instanceID>uuid:"));
    }

    #[test]
    fn serialization_strips_non_root_attributes() {
        let form = XForm::new(TEMPLATE).unwrap();
        let xml = form.to_xml().unwrap();
        assert!(!xml.contains("default="));
        assert!(xml.contains("<visit_date/>"));
    }

    #[test]
    fn serialization_escapes_text() {
        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_field("info/name", "A & B <i>").unwrap();
        let xml = form.to_xml().unwrap();
        assert!(xml.contains("A &amp; B &lt;i&gt;"));
    }

    #[test]
    fn group_value_lands_after_children() {
        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_field("info", "annotation").unwrap();
        let xml = form.to_xml().unwrap();
        assert!(xml.contains("<info><name/><age/>annotation</info>"));
    }

    #[test]
    fn unknown_path_always_errors() {
        let mut form = XForm::new(TEMPLATE).unwrap();

        let err = form.set_field("nope", "x").unwrap_err();
        assert!(matches!(err, OdkError::FieldNotFound { .. }));

        // The path check comes before the null no-op.
        let err = form.set_field("info/nope", FieldValue::Null).unwrap_err();
        assert!(matches!(err, OdkError::FieldNotFound { .. }));

        let err = form.set_file("nope", "photo.jpg").unwrap_err();
        assert!(matches!(err, OdkError::FieldNotFound { .. }));
    }

    #[test]
    fn null_leaves_field_unset() {
        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_field("info/name", FieldValue::Null).unwrap();
        assert_eq!(form.value("info/name"), None);
        assert!(form.to_xml().unwrap().contains("<name/>"));
    }

    #[test]
    fn converts_values_to_canonical_text() {
        let mut form = XForm::new(TEMPLATE).unwrap();

        form.set_field("info/age", 30).unwrap();
        assert_eq!(form.value("info/age"), Some("30"));

        form.set_field("info/age", 36.6).unwrap();
        assert_eq!(form.value("info/age"), Some("36.6"));

        form.set_field("visit_date", NaiveDate::from_ymd_opt(1980, 1, 31).unwrap())
            .unwrap();
        assert_eq!(form.value("visit_date"), Some("1980-01-31"));

        form.set_field("info/name", NaiveTime::from_hms_opt(14, 30, 5).unwrap())
            .unwrap();
        assert_eq!(form.value("info/name"), Some("14:30:05.0"));

        let dt = NaiveDate::from_ymd_opt(1980, 1, 31)
            .unwrap()
            .and_hms_opt(14, 30, 5)
            .unwrap();
        form.set_field("info/name", dt).unwrap();
        assert_eq!(form.value("info/name"), Some("1980-01-31 14:30:05.0"));

        form.set_field("info/name", Option::<&str>::None).unwrap();
        assert_eq!(form.value("info/name"), Some("1980-01-31 14:30:05.0"));
    }

    #[test]
    fn setting_twice_overwrites() {
        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_field("info/name", "Alice").unwrap();
        form.set_field("info/name", "Bob").unwrap();
        assert_eq!(form.value("info/name"), Some("Bob"));
    }

    #[test]
    fn reset_regenerates_instance_id() {
        let mut form = XForm::new(TEMPLATE).unwrap();
        let before = form.value("meta/instanceID").unwrap().to_string();

        form.set_field("info/name", "Alice").unwrap();
        form.reset().unwrap();

        let after = form.value("meta/instanceID").unwrap();
        assert_ne!(before, after);
        assert!(after.starts_with("uuid:"));
        assert_eq!(form.value("info/name"), None);
        assert_eq!(form.submission_parts().unwrap().len(), 1);
    }

    #[test]
    fn attaches_files_with_inferred_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.jpg");
        fs::write(&photo, b"\xff\xd8fake").unwrap();

        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_file("xray_image", &photo).unwrap();
        assert_eq!(form.value("xray_image"), Some("photo.jpg"));

        let parts = form.submission_parts().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "xml_submission_file");
        assert_eq!(parts[0].content_type, "text/xml");
        assert!(parts[0].filename.starts_with("intake1_"));
        assert!(parts[0].filename.ends_with(".xml"));

        assert_eq!(parts[1].name, "photo.jpg");
        assert_eq!(parts[1].filename, "photo.jpg");
        assert_eq!(parts[1].content_type, "image/jpeg");
        assert_eq!(parts[1].content, b"\xff\xd8fake");
    }

    #[test]
    fn unknown_extension_falls_back_to_binary() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("scan.zz9");
        fs::write(&blob, b"blob").unwrap();

        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_file("xray_image", &blob).unwrap();
        let parts = form.submission_parts().unwrap();
        assert_eq!(parts[1].content_type, "application/binary");
    }

    #[test]
    fn reattaching_a_field_replaces_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.png");
        let second = dir.path().join("second.png");
        fs::write(&first, b"one").unwrap();
        fs::write(&second, b"two").unwrap();

        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_file("xray_image", &first).unwrap();
        form.set_file("xray_image", &second).unwrap();

        let parts = form.submission_parts().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].filename, "second.png");
        assert_eq!(parts[1].content, b"two");
    }

    #[test]
    fn missing_attachment_file_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.jpg");
        fs::write(&gone, b"x").unwrap();

        let mut form = XForm::new(TEMPLATE).unwrap();
        form.set_file("xray_image", &gone).unwrap();
        fs::remove_file(&gone).unwrap();

        let err = form.submission_parts().unwrap_err();
        assert!(err.to_string().contains("gone.jpg"));
    }

    #[test]
    fn rejects_unparseable_xml() {
        let err = XForm::new("<h:html><oops").unwrap_err();
        assert!(matches!(err, OdkError::MalformedTemplate { .. }));
    }

    #[test]
    fn rejects_missing_structure() {
        let err = XForm::new("<h:html><h:head></h:head></h:html>").unwrap_err();
        assert!(err.to_string().contains("model"));
    }

    #[test]
    fn rejects_ambiguous_instance() {
        let two_roots = r#"<h:html><h:head><model><instance>
            <data id="a"><meta><instanceID/></meta></data>
            <other id="b"><meta><instanceID/></meta></other>
        </instance></model></h:head></h:html>"#;
        let err = XForm::new(two_roots).unwrap_err();
        assert!(err.to_string().contains("no unique form instance"));

        let two_instances = r#"<h:html><h:head><model>
            <instance><data id="a"><meta><instanceID/></meta></data></instance>
            <instance><data id="b"><meta><instanceID/></meta></data></instance>
        </model></h:head></h:html>"#;
        let err = XForm::new(two_instances).unwrap_err();
        assert!(err.to_string().contains("not unique"));
    }

    #[test]
    fn rejects_instance_without_id() {
        let no_id = r#"<h:html><h:head><model><instance>
            <data><meta><instanceID/></meta></data>
        </instance></model></h:head></h:html>"#;
        let err = XForm::new(no_id).unwrap_err();
        assert!(err.to_string().contains("id attribute"));
    }

    #[test]
    fn rejects_template_without_instance_id_field() {
        let no_meta = r#"<h:html><h:head><model><instance>
            <data id="a"><info/></data>
        </instance></model></h:head></h:html>"#;
        let err = XForm::new(no_meta).unwrap_err();
        assert!(matches!(err, OdkError::FieldNotFound { .. }));
    }
}
