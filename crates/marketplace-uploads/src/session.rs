use marketplace_core::{AppError, SessionId, SessionManifest};

/// Issues upload session ids.
///
/// Pure generation: nothing is persisted until the first chunk arrives.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    max_total_chunks: u32,
}

impl SessionRegistry {
    pub fn new(max_total_chunks: u32) -> Self {
        Self { max_total_chunks }
    }

    /// Validate the declared manifest and mint a fresh 128-bit id.
    pub fn create_session(&self, manifest: &SessionManifest) -> Result<SessionId, AppError> {
        manifest.validate(self.max_total_chunks)?;

        let session_id = SessionId::from_bytes(rand::random::<[u8; 16]>());

        tracing::info!(
            session_id = %session_id,
            file_name = %manifest.file_name,
            total_chunks = manifest.total_chunks,
            total_file_size = manifest.total_file_size,
            "Upload session created"
        );

        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn manifest(total_chunks: u32) -> SessionManifest {
        SessionManifest {
            file_name: "course.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            total_file_size: 10 * 1024 * 1024,
            total_chunks,
        }
    }

    #[test]
    fn test_ids_are_distinct() {
        let registry = SessionRegistry::new(100);
        let ids: HashSet<SessionId> = (0..1000)
            .map(|_| registry.create_session(&manifest(10)).unwrap())
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_zero_chunks_rejected() {
        let registry = SessionRegistry::new(100);
        assert!(matches!(
            registry.create_session(&manifest(0)),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_chunk_cap_enforced() {
        let registry = SessionRegistry::new(4);
        assert!(registry.create_session(&manifest(4)).is_ok());
        assert!(registry.create_session(&manifest(5)).is_err());
    }
}
