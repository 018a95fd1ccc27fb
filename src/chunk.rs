//! Region-text chunker and draft construction.
//!
//! Region text is split on a word budget; indices are contiguous and
//! 0-based across the whole document (not per region), which is what the
//! resume pointer counts.

use crate::error::Result;
use crate::identity;
use crate::models::ChunkDraft;
use crate::parser::PolicyDocument;

/// Split normalized text into word-budgeted pieces. Always returns at least
/// one piece so even an empty region yields a row.
pub fn split_words(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return vec![text.trim().to_string()];
    }

    let mut pieces = Vec::new();
    for window in words.chunks(max_words.max(1)) {
        pieces.push(window.join(" "));
    }
    pieces
}

/// Build the ordered drafts for one parsed document. Chunk indices run
/// 0..N-1 over the concatenation of all regions in document order.
pub fn build_drafts(
    doc: &PolicyDocument,
    xml_path: &str,
    max_words: usize,
) -> Result<Vec<ChunkDraft>> {
    let mut drafts = Vec::new();
    let mut chunk_index: i64 = 0;

    for region in &doc.regions {
        let identity_hash = identity::identity_hash(&region.identity);
        let text = identity::normalize_text(&region.chunkable_text(&doc.project, &doc.policy_version));

        for piece in split_words(&text, max_words) {
            drafts.push(ChunkDraft {
                identity: region.identity.clone(),
                policy_version: doc.policy_version.clone(),
                range: region.range.clone(),
                chunk_index,
                content_hash: identity::content_hash(&piece),
                chunk_text: piece,
                identity_hash: identity_hash.clone(),
                xml_path: xml_path.to_string(),
            });
            chunk_index += 1;
        }
    }

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_policy_xml;

    fn sample_doc() -> PolicyDocument {
        let xml = r#"
<Policy project="AMBOSELI" version="v1.0">
  <MPU name="MPU0">
    <PRTn index="3" profile="TZ" start="0x1000" end="0x1FFF">
      <SecurityRationale>alpha beta gamma delta epsilon zeta eta theta</SecurityRationale>
    </PRTn>
    <PRTn index="4" start="0x2000" end="0x2FFF"/>
  </MPU>
</Policy>
"#;
        parse_policy_xml("sample.xml", xml).unwrap()
    }

    #[test]
    fn split_respects_budget() {
        let pieces = split_words("one two three four five", 2);
        assert_eq!(pieces, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn split_empty_yields_single_piece() {
        assert_eq!(split_words("", 10).len(), 1);
    }

    #[test]
    fn indices_are_contiguous_across_regions() {
        let doc = sample_doc();
        let drafts = build_drafts(&doc, "sample.xml", 8).unwrap();
        assert!(drafts.len() >= 2);
        for (i, d) in drafts.iter().enumerate() {
            assert_eq!(d.chunk_index, i as i64);
        }
        // Regions keep distinct identities.
        assert_ne!(
            drafts.first().unwrap().identity_hash,
            drafts.last().unwrap().identity_hash
        );
    }

    #[test]
    fn drafts_are_deterministic() {
        let doc = sample_doc();
        let a = build_drafts(&doc, "sample.xml", 8).unwrap();
        let b = build_drafts(&doc, "sample.xml", 8).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content_hash, y.content_hash);
            assert_eq!(x.identity_hash, y.identity_hash);
            assert_eq!(x.chunk_index, y.chunk_index);
        }
    }
}
