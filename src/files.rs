use crate::models::UploadedFileDescriptor;

// ============================================================================
// Uploaded File Registry
// ============================================================================

/// Descriptors handed over by the file-ingestion side, in upload order.
///
/// The core only reads these; registration happens on the ingestion side.
#[derive(Debug, Clone, Default)]
pub struct UploadedFileRegistry {
    files: Vec<UploadedFileDescriptor>,
}

impl UploadedFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor, replacing any existing one with the same handle.
    pub fn register(&mut self, descriptor: UploadedFileDescriptor) {
        match self.files.iter_mut().find(|f| f.handle == descriptor.handle) {
            Some(existing) => *existing = descriptor,
            None => {
                log::info!("📄 Registered upload {}", descriptor.display_name);
                self.files.push(descriptor);
            }
        }
    }

    pub fn remove(&mut self, handle: &str) -> Option<UploadedFileDescriptor> {
        let idx = self.files.iter().position(|f| f.handle == handle)?;
        Some(self.files.remove(idx))
    }

    pub fn get(&self, handle: &str) -> Option<&UploadedFileDescriptor> {
        self.files.iter().find(|f| f.handle == handle)
    }

    pub fn descriptors(&self) -> &[UploadedFileDescriptor] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FromIterator<UploadedFileDescriptor> for UploadedFileRegistry {
    fn from_iter<I: IntoIterator<Item = UploadedFileDescriptor>>(iter: I) -> Self {
        let mut registry = Self::new();
        for descriptor in iter {
            registry.register(descriptor);
        }
        registry
    }
}

// ============================================================================
// MIME helpers
// ============================================================================

/// `mime_kind` may be a full MIME type ("application/pdf") or a bare kind
/// ("pdf"); fall back to guessing from the display name.
pub fn is_pdf_descriptor(file: &UploadedFileDescriptor) -> bool {
    let kind = file.mime_kind.trim().to_ascii_lowercase();
    if !kind.is_empty() {
        return kind == "pdf" || kind.ends_with("/pdf");
    }
    mime_guess::from_path(&file.display_name)
        .first()
        .is_some_and(|mime| mime.essence_str() == "application/pdf")
}
