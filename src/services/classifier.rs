//! EPC classification by identifier length
//!
//! Pallet tags carry long-form EPCs, operator badges short-form ones; the
//! reader reports both on the same stream. Classification is total and never
//! fails: malformed input degrades to `Unknown`.

use crate::domain::types::{TagId, TagKind};

/// Default long-form (pallet) EPC length
pub const DEFAULT_PALLET_ID_LEN: usize = 16;

/// Default short-form (operator) EPC length
pub const DEFAULT_OPERATOR_ID_LEN: usize = 12;

/// Maps raw EPC strings to a normalized `TagId` and its `TagKind`
#[derive(Debug, Clone, Copy)]
pub struct TagClassifier {
    pallet_id_len: usize,
    operator_id_len: usize,
}

impl TagClassifier {
    pub fn new(pallet_id_len: usize, operator_id_len: usize) -> Self {
        Self { pallet_id_len, operator_id_len }
    }

    /// Classify a raw tag read. Pure and idempotent:
    /// `classify(classify(x).0.as_str()) == classify(x)`.
    ///
    /// Normalization strips embedded whitespace only; readers may insert
    /// spaces between EPC words.
    pub fn classify(&self, raw: &str) -> (TagId, TagKind) {
        let normalized: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

        let kind = if normalized.len() == self.pallet_id_len {
            TagKind::Pallet
        } else if normalized.len() == self.operator_id_len {
            TagKind::Operator
        } else {
            TagKind::Unknown
        };

        (TagId(normalized), kind)
    }
}

impl Default for TagClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PALLET_ID_LEN, DEFAULT_OPERATOR_ID_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pallet_by_length() {
        let classifier = TagClassifier::default();
        let (id, kind) = classifier.classify("AAAABBBBCCCCDDDD");
        assert_eq!(kind, TagKind::Pallet);
        assert_eq!(id.as_str(), "AAAABBBBCCCCDDDD");
    }

    #[test]
    fn test_classify_operator_by_length() {
        let classifier = TagClassifier::default();
        let (id, kind) = classifier.classify("111122223333");
        assert_eq!(kind, TagKind::Operator);
        assert_eq!(id.as_str(), "111122223333");
    }

    #[test]
    fn test_classify_strips_embedded_whitespace() {
        let classifier = TagClassifier::default();
        // Readers commonly report EPC words space-separated
        let (id, kind) = classifier.classify("AAAA BBBB CCCC DDDD");
        assert_eq!(kind, TagKind::Pallet);
        assert_eq!(id.as_str(), "AAAABBBBCCCCDDDD");
    }

    #[test]
    fn test_classify_unknown_lengths() {
        let classifier = TagClassifier::default();
        assert_eq!(classifier.classify("AABBCCDD").1, TagKind::Unknown);
        assert_eq!(classifier.classify("").1, TagKind::Unknown);
        assert_eq!(classifier.classify("AAAABBBBCCCCDDDD00").1, TagKind::Unknown);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let classifier = TagClassifier::default();
        let (id, kind) = classifier.classify(" AAAA BBBB CCCC DDDD ");
        let (id2, kind2) = classifier.classify(id.as_str());
        assert_eq!(id, id2);
        assert_eq!(kind, kind2);
    }

    #[test]
    fn test_classify_custom_lengths() {
        let classifier = TagClassifier::new(8, 4);
        assert_eq!(classifier.classify("AABBCCDD").1, TagKind::Pallet);
        assert_eq!(classifier.classify("AABB").1, TagKind::Operator);
        assert_eq!(classifier.classify("AAAABBBBCCCCDDDD").1, TagKind::Unknown);
    }
}
