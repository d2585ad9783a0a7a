use crate::error::StoreError;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Upload validation shared by every transport that accepts a PDF
/// (spec.md §6 "PDF validation"): magic bytes and a configured size limit.
pub struct PdfValidation {
    pub max_upload_size_bytes: u64,
}

impl PdfValidation {
    pub fn new(max_upload_size_bytes: u64) -> Self {
        PdfValidation { max_upload_size_bytes }
    }

    pub fn validate(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if bytes.len() as u64 > self.max_upload_size_bytes {
            return Err(StoreError::InvalidPdf(format!(
                "upload is {} bytes, exceeds the {} byte limit",
                bytes.len(),
                self.max_upload_size_bytes
            )));
        }
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(StoreError::InvalidPdf(
                "file does not begin with the %PDF- magic bytes".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_magic_bytes() {
        let v = PdfValidation::new(1_000_000);
        assert!(v.validate(b"not a pdf").is_err());
    }

    #[test]
    fn rejects_oversized_uploads() {
        let v = PdfValidation::new(4);
        assert!(v.validate(b"%PDF-1.7").is_err());
    }

    #[test]
    fn accepts_well_formed_small_pdf() {
        let v = PdfValidation::new(1_000_000);
        assert!(v.validate(b"%PDF-1.7\n...").is_ok());
    }
}
