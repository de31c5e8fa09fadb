//! Document identifier generation.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of auto-assigned document ids.
pub const DOC_ID_LEN: usize = 16;

/// Generates a random alphanumeric document id.
///
/// Collision probability over 16 alphanumeric characters is negligible,
/// but the datastore still checks the `_id` index and redraws on a hit.
#[must_use]
pub fn create_doc_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DOC_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_shape() {
        let id = create_doc_id();
        assert_eq!(id.len(), DOC_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn ids_differ() {
        assert_ne!(create_doc_id(), create_doc_id());
    }
}
