// Hostile input catalogues for Gauntlet
// Fixed strings and files for the fuzz and upload probes

/// One hostile string for a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostileInput {
    pub name: &'static str,
    pub value: String,
}

/// One hostile file, either for a UI upload control or a multipart API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostileFile {
    pub name: &'static str,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl HostileFile {
    fn new(name: &'static str, filename: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name,
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }
}

const OVERLONG_LEN: usize = 10_000;

fn input(name: &'static str, value: impl Into<String>) -> HostileInput {
    HostileInput {
        name,
        value: value.into(),
    }
}

/// Field-level edge cases, in the order the input-fuzz probe runs them.
pub fn hostile_strings() -> Vec<HostileInput> {
    vec![
        input("empty", ""),
        input("overlong", "A".repeat(OVERLONG_LEN)),
        input("special-characters", r#"!@#$%^&*()_+{}|:"<>?`~[]\;',./"#),
        input("script-injection", "<script>alert('gauntlet')</script>"),
        input("attribute-injection", "\"><img src=x onerror=alert(1)>"),
        input("sql-tautology", "' OR '1'='1' --"),
        input("sql-stacked-query", "1; DROP TABLE users; --"),
        input("nosql-operator", r#"{"$ne": null}"#),
        input("null-byte", "gauntlet\0suffix"),
        input("numeric-overflow", "99999999999999999999999999999999"),
        input("negative-overflow", "-2147483649"),
        input("malformed-email", "user@@example..com"),
        input("unicode-stress", "Z\u{0351}\u{0358}a\u{0362}l\u{0334}g\u{0337}o \u{202E}txt.exe \u{1F469}\u{200D}\u{1F469}\u{200D}\u{1F467} \u{FDFD}"),
    ]
}

fn pdf_bytes(extra: &str) -> Vec<u8> {
    format!("%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\n{}endobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n", extra).into_bytes()
}

fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 64]);
    bytes
}

/// Bytes that look like a ZIP whose single entry claims a huge uncompressed size.
fn bomb_bytes() -> Vec<u8> {
    let mut bytes = b"PK\x03\x04\x14\x00\x00\x00\x08\x00".to_vec();
    bytes.extend_from_slice(&[0u8; 8]); // time, date, crc
    bytes.extend_from_slice(&1024u32.to_le_bytes()); // compressed size
    bytes.extend_from_slice(&u32::MAX.to_le_bytes()); // uncompressed size
    bytes.extend_from_slice(&8u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(b"bomb.txt");
    bytes.extend(std::iter::repeat(0u8).take(1024));
    bytes
}

/// Files for the UI file-fuzz probe. `max_bytes` is the upload limit the target advertises.
pub fn hostile_files(max_bytes: usize) -> Vec<HostileFile> {
    let mut corrupted = b"%PDF-".to_vec();
    corrupted.extend_from_slice(&[0xFF, 0x00, 0xFE, 0x13, 0x37, 0x00, 0xC0, 0xDE]);
    vec![
        HostileFile::new("zero-byte", "empty.pdf", "application/pdf", Vec::new()),
        HostileFile::new("oversized", "huge.pdf", "application/pdf", oversized(max_bytes)),
        HostileFile::new("corrupted-header", "broken.pdf", "application/pdf", corrupted),
        HostileFile::new(
            "embedded-script",
            "script.pdf",
            "application/pdf",
            pdf_bytes("/OpenAction << /S /JavaScript /JS (app.alert('gauntlet')) >>\n"),
        ),
        HostileFile::new("type-mismatch", "image.pdf", "application/pdf", png_bytes()),
    ]
}

/// Adversarial submissions for the malicious-upload API probe.
pub fn malicious_uploads(max_bytes: usize) -> Vec<HostileFile> {
    vec![
        HostileFile::new("oversized", "cv.pdf", "application/pdf", oversized(max_bytes)),
        HostileFile::new("wrong-declared-type", "cv.pdf", "application/x-msdownload", b"MZ\x90\x00\x03\x00\x00\x00".to_vec()),
        HostileFile::new("double-extension", "cv.pdf.exe", "application/pdf", pdf_bytes("")),
        HostileFile::new("null-byte-filename", "cv.php\0.pdf", "application/pdf", pdf_bytes("")),
        HostileFile::new("empty-file", "empty.pdf", "application/pdf", Vec::new()),
        HostileFile::new(
            "script-markup",
            "cv.svg",
            "image/svg+xml",
            b"<svg xmlns=\"http://www.w3.org/2000/svg\"><script>alert(document.cookie)</script></svg>".to_vec(),
        ),
        HostileFile::new("decompression-bomb", "cv.zip", "application/zip", bomb_bytes()),
        HostileFile::new("path-traversal-filename", "../../../../etc/passwd", "application/pdf", pdf_bytes("")),
    ]
}

fn oversized(max_bytes: usize) -> Vec<u8> {
    let mut bytes = pdf_bytes("");
    let target = max_bytes.saturating_add(1).max(bytes.len());
    bytes.resize(target, b' ');
    bytes
}
