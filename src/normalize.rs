//! Plain-text extraction for `.docx` (WordprocessingML) diary files.
//!
//! Only the top-level body paragraphs are read, in document order, and joined
//! with `\n`. Formatting is dropped; tables, text boxes, headers and footers
//! are not extracted. Empty paragraphs are kept as empty lines.

use std::io::Read;

use quick_xml::events::Event;

use crate::error::PipelineError;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_PART: &str = "word/document.xml";

/// Converts paragraph-structured rich documents into plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer;

impl TextNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a `.docx` byte buffer to plain text.
    pub fn normalize(&self, bytes: &[u8]) -> Result<String, PipelineError> {
        Ok(docx_paragraphs(bytes)?.join("\n"))
    }
}

/// Paragraph texts of a `.docx`, in document order.
pub fn docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>, PipelineError> {
    let xml = read_document_part(bytes)?;
    body_paragraphs(&xml)
}

fn read_document_part(bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::MalformedDocument(e.to_string()))?;
    let entry = archive.by_name(DOCUMENT_PART).map_err(|_| {
        PipelineError::MalformedDocument(format!("{} not found", DOCUMENT_PART))
    })?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::MalformedDocument(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(PipelineError::MalformedDocument(format!(
            "{} exceeds size limit ({} bytes)",
            DOCUMENT_PART, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Elements under a body paragraph whose text does not belong to it.
const FOREIGN_CONTAINERS: [&[u8]; 3] = [b"p", b"tbl", b"txbxContent"];

/// True when `stack` sits inside a top-level body paragraph and not inside a
/// nested paragraph, table, or text box.
fn in_body_paragraph(stack: &[Vec<u8>]) -> bool {
    let Some(body) = stack.iter().position(|name| name.as_slice() == b"body") else {
        return false;
    };
    match stack.get(body + 1) {
        Some(name) if name.as_slice() == b"p" => {}
        _ => return false,
    }
    !stack[body + 2..]
        .iter()
        .any(|name| FOREIGN_CONTAINERS.contains(&name.as_slice()))
}

fn parent_is_body(stack: &[Vec<u8>]) -> bool {
    stack.last().map(|n| n.as_slice() == b"body").unwrap_or(false)
}

fn body_paragraphs(xml: &[u8]) -> Result<Vec<String>, PipelineError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"p" && parent_is_body(&stack) {
                    current.clear();
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"p" && parent_is_body(&stack) {
                    paragraphs.push(String::new());
                } else if in_body_paragraph(&stack)
                    && stack.last().map(|n| n.as_slice() == b"r").unwrap_or(false)
                {
                    match name {
                        b"tab" => current.push('\t'),
                        b"br" | b"cr" => current.push('\n'),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(te)) => {
                if stack.last().map(|n| n.as_slice() == b"t").unwrap_or(false)
                    && in_body_paragraph(&stack)
                {
                    let text = te
                        .unescape()
                        .map_err(|e| PipelineError::MalformedDocument(e.to_string()))?;
                    current.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                let closed = stack.pop();
                if closed.as_deref() == Some(b"p".as_slice()) && parent_is_body(&stack) {
                    paragraphs.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PipelineError::MalformedDocument(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(PipelineError::MalformedDocument(
            "unexpected end of document.xml".to_string(),
        ));
    }
    Ok(paragraphs)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    pub(crate) fn docx_with_body(body_xml: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(DOCUMENT_PART, zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
                 <w:document xmlns:w=\"{}\"><w:body>{}</w:body></w:document>",
                W_NS, body_xml
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    pub(crate) fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| {
                if p.is_empty() {
                    "<w:p/>".to_string()
                } else {
                    format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p)
                }
            })
            .collect();
        docx_with_body(&body)
    }

    #[test]
    fn joins_paragraphs_and_keeps_empty_lines() {
        let bytes = docx_with_paragraphs(&["Hello", "", "World"]);
        let text = TextNormalizer::new().normalize(&bytes).unwrap();
        assert_eq!(text, "Hello\n\nWorld");
    }

    #[test]
    fn empty_paragraph_with_properties_is_an_empty_line() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>a</w:t></w:r></w:p>\
             <w:p><w:pPr><w:jc w:val=\"center\"/></w:pPr></w:p>\
             <w:p><w:r><w:t>b</w:t></w:r></w:p>",
        );
        assert_eq!(TextNormalizer::new().normalize(&bytes).unwrap(), "a\n\nb");
    }

    #[test]
    fn runs_are_concatenated_without_separators() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>朝は</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>晴れ</w:t></w:r></w:p>",
        );
        assert_eq!(TextNormalizer::new().normalize(&bytes).unwrap(), "朝は晴れ");
    }

    #[test]
    fn preserves_spaces_tabs_and_breaks() {
        let bytes = docx_with_body(
            "<w:p><w:pPr><w:tabs><w:tab w:val=\"left\" w:pos=\"720\"/></w:tabs></w:pPr>\
             <w:r><w:t xml:space=\"preserve\">a </w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p>",
        );
        assert_eq!(TextNormalizer::new().normalize(&bytes).unwrap(), "a \tb\nc");
    }

    #[test]
    fn unescapes_entities() {
        let bytes = docx_with_paragraphs(&["Tom &amp; Jerry &lt;3"]);
        assert_eq!(
            TextNormalizer::new().normalize(&bytes).unwrap(),
            "Tom & Jerry <3"
        );
    }

    #[test]
    fn skips_tables() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>before</w:t></w:r></w:p>\
             <w:tbl><w:tr><w:tc><w:p><w:r><w:t>cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>\
             <w:p><w:r><w:t>after</w:t></w:r></w:p>",
        );
        assert_eq!(
            TextNormalizer::new().normalize(&bytes).unwrap(),
            "before\nafter"
        );
    }

    #[test]
    fn skips_text_boxes_inside_paragraphs() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>main</w:t></w:r><w:r><w:pict><w:txbxContent>\
             <w:p><w:r><w:t>boxed</w:t></w:r></w:p></w:txbxContent></w:pict></w:r></w:p>",
        );
        assert_eq!(TextNormalizer::new().normalize(&bytes).unwrap(), "main");
    }

    #[test]
    fn empty_body_is_empty_text() {
        let bytes = docx_with_body("");
        assert_eq!(TextNormalizer::new().normalize(&bytes).unwrap(), "");
    }

    #[test]
    fn not_a_zip_is_malformed() {
        let err = TextNormalizer::new().normalize(b"not a zip").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedDocument(_)));
    }

    #[test]
    fn zip_without_document_part_is_malformed() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = TextNormalizer::new().normalize(&buf).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn truncated_xml_is_malformed() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(DOCUMENT_PART, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<w:document xmlns:w=\"x\"><w:body><w:p><w:r><w:t>cut")
                .unwrap();
            zip.finish().unwrap();
        }
        assert!(TextNormalizer::new().normalize(&buf).is_err());
    }
}
