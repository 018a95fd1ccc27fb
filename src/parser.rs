//! Policy document parser.
//!
//! Reads the XML export of an MPU policy set:
//!
//! ```xml
//! <Policy project="AMBOSELI" version="v1.2">
//!   <MPU name="MPU0">
//!     <PRTn index="3" profile="TZ" start="0x40000000" end="0x4000FFFF">
//!       <SecurityRationale>Why this region exists.</SecurityRationale>
//!       <SecurityRationalePoC>security@example.com</SecurityRationalePoC>
//!     </PRTn>
//!   </MPU>
//! </Policy>
//! ```
//!
//! Regions are returned in document order. Address ranges are validated here
//! (hex parse, end >= start) so malformed identities surface as
//! `ConstraintViolation` before any row is written.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{LedgerError, Result};
use crate::identity;
use crate::models::{AddressRange, PolicyIdentity};

/// A parsed source document: project-level attributes plus ordered regions.
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    pub project: String,
    pub policy_version: String,
    pub regions: Vec<PolicyRegion>,
    /// Fingerprint of the normalized document text; a changed fingerprint on
    /// a DONE path restarts ingestion from chunk 0.
    pub source_hash: String,
}

/// One `<PRTn>` protection region.
#[derive(Debug, Clone)]
pub struct PolicyRegion {
    pub identity: PolicyIdentity,
    pub range: AddressRange,
    /// Rationale text gathered from the region's child elements.
    pub rationale: String,
}

impl PolicyRegion {
    /// Text handed to the chunker: the identity and range rendered as
    /// labelled lines, followed by the rationale.
    pub fn chunkable_text(&self, project: &str, policy_version: &str) -> String {
        let mut text = format!(
            "MPU: {}\nProject: {}\nVersion: {}\nProfile: {}\nRG Index: {}\nStart: {}\nEnd: {}",
            self.identity.mpu_name,
            project,
            policy_version,
            self.identity.profile,
            self.identity.rg_index,
            self.range.start_hex,
            self.range.end_hex,
        );
        if !self.rationale.trim().is_empty() {
            text.push_str("\n\n");
            text.push_str(self.rationale.trim());
        }
        text
    }
}

/// Parse and validate an address range. The hex strings are preserved
/// verbatim for audit; only the derived decimals are computed.
pub fn parse_range(start_hex: &str, end_hex: &str) -> Result<AddressRange> {
    let start_dec = parse_hex(start_hex)?;
    let end_dec = parse_hex(end_hex)?;
    if end_dec < start_dec {
        return Err(LedgerError::ConstraintViolation(format!(
            "end address {} is below start address {}",
            end_hex, start_hex
        )));
    }
    Ok(AddressRange {
        start_hex: start_hex.to_string(),
        end_hex: end_hex.to_string(),
        start_dec,
        end_dec,
    })
}

fn parse_hex(val: &str) -> Result<i64> {
    let trimmed = val.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    i64::from_str_radix(digits, 16)
        .map_err(|_| LedgerError::ConstraintViolation(format!("invalid hex address: '{}'", val)))
}

fn attr_map(path: &str, e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| LedgerError::Parse {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| LedgerError::Parse {
                path: path.to_string(),
                reason: err.to_string(),
            })?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn lookup<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn parse_prtn(
    path: &str,
    e: &BytesStart<'_>,
    project: &str,
    mpu_name: &str,
) -> Result<(PolicyIdentity, AddressRange)> {
    let parse_err = |reason: String| LedgerError::Parse {
        path: path.to_string(),
        reason,
    };

    let attrs = attr_map(path, e)?;
    let rg_index: i64 = lookup(&attrs, "index")
        .ok_or_else(|| parse_err("PRTn missing index".into()))?
        .parse()
        .map_err(|_| parse_err("invalid rg index".into()))?;
    let start_hex = lookup(&attrs, "start").ok_or_else(|| parse_err("PRTn missing start".into()))?;
    let end_hex = lookup(&attrs, "end").ok_or_else(|| parse_err("PRTn missing end".into()))?;

    let identity = PolicyIdentity::new(project, mpu_name, rg_index, lookup(&attrs, "profile"));
    let range = parse_range(start_hex, end_hex)?;
    Ok((identity, range))
}

/// Parse a policy XML document. `path` is only used for diagnostics and the
/// progress key.
pub fn parse_policy_xml(path: &str, xml: &str) -> Result<PolicyDocument> {
    let parse_err = |reason: String| LedgerError::Parse {
        path: path.to_string(),
        reason,
    };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut project: Option<String> = None;
    let mut policy_version: Option<String> = None;
    let mut current_mpu: Option<String> = None;
    let mut regions: Vec<PolicyRegion> = Vec::new();

    // Region currently open (Start..End), gathering rationale text.
    let mut open_region: Option<(PolicyIdentity, AddressRange)> = None;
    let mut rationale = String::new();
    let mut in_rationale = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Policy" => {
                    let attrs = attr_map(path, &e)?;
                    project = lookup(&attrs, "project").map(str::to_string);
                    policy_version = lookup(&attrs, "version").map(str::to_string);
                }
                b"MPU" => {
                    let attrs = attr_map(path, &e)?;
                    current_mpu = lookup(&attrs, "name").map(str::to_string);
                }
                b"PRTn" => {
                    let project = project
                        .as_deref()
                        .ok_or_else(|| parse_err("missing project attribute".into()))?;
                    let mpu = current_mpu
                        .as_deref()
                        .ok_or_else(|| parse_err("PRTn outside of MPU element".into()))?;
                    open_region = Some(parse_prtn(path, &e, project, mpu)?);
                    rationale.clear();
                }
                b"SecurityRationale" | b"SecurityRationalePoC" => {
                    in_rationale = open_region.is_some();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"PRTn" => {
                    let project = project
                        .as_deref()
                        .ok_or_else(|| parse_err("missing project attribute".into()))?;
                    let mpu = current_mpu
                        .as_deref()
                        .ok_or_else(|| parse_err("PRTn outside of MPU element".into()))?;
                    let (identity, range) = parse_prtn(path, &e, project, mpu)?;
                    regions.push(PolicyRegion {
                        identity,
                        range,
                        rationale: String::new(),
                    });
                }
                b"MPU" => {}
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_rationale {
                    let piece = t.unescape().map_err(|err| parse_err(err.to_string()))?;
                    if !rationale.is_empty() {
                        rationale.push('\n');
                    }
                    rationale.push_str(piece.as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"SecurityRationale" | b"SecurityRationalePoC" => in_rationale = false,
                b"PRTn" => {
                    if let Some((identity, range)) = open_region.take() {
                        regions.push(PolicyRegion {
                            identity,
                            range,
                            rationale: rationale.clone(),
                        });
                    }
                }
                b"MPU" => current_mpu = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(parse_err(err.to_string())),
            _ => {}
        }
    }

    let project = project.ok_or_else(|| parse_err("missing project attribute".into()))?;
    let policy_version =
        policy_version.ok_or_else(|| parse_err("missing version attribute".into()))?;

    if regions.is_empty() {
        return Err(parse_err("document contains no PRTn regions".into()));
    }

    Ok(PolicyDocument {
        project,
        policy_version,
        regions,
        source_hash: identity::content_hash(xml),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<Policy project="AMBOSELI" version="v1.0">
  <MPU name="MPU0">
    <PRTn index="3" profile="TZ" start="0x40000000" end="0x4000FFFF">
      <SecurityRationale>Protects the secure boot region.</SecurityRationale>
      <SecurityRationalePoC>soc-security</SecurityRationalePoC>
    </PRTn>
    <PRTn index="4" start="0x50000000" end="0x5000FFFF"/>
  </MPU>
</Policy>
"#;

    #[test]
    fn parses_regions_in_order() {
        let doc = parse_policy_xml("policy_v1.xml", SAMPLE).unwrap();
        assert_eq!(doc.project, "AMBOSELI");
        assert_eq!(doc.policy_version, "v1.0");
        assert_eq!(doc.regions.len(), 2);
        assert_eq!(doc.regions[0].identity.rg_index, 3);
        assert_eq!(doc.regions[0].identity.profile, "TZ");
        assert!(doc.regions[0].rationale.contains("secure boot"));
        // Missing profile falls back to the sentinel.
        assert_eq!(doc.regions[1].identity.profile, "TZ");
        assert_eq!(doc.regions[1].range.start_dec, 0x5000_0000);
    }

    #[test]
    fn chunkable_text_carries_identity_and_range() {
        let doc = parse_policy_xml("policy_v1.xml", SAMPLE).unwrap();
        let text = doc.regions[0].chunkable_text(&doc.project, &doc.policy_version);
        assert!(text.contains("MPU: MPU0"));
        assert!(text.contains("Start: 0x40000000"));
        assert!(text.contains("Protects the secure boot region."));
    }

    #[test]
    fn inverted_range_is_constraint_violation() {
        let xml = r#"<Policy project="P" version="v1"><MPU name="M"><PRTn index="0" start="0x2000" end="0x1000"/></MPU></Policy>"#;
        match parse_policy_xml("bad.xml", xml) {
            Err(LedgerError::ConstraintViolation(_)) => {}
            other => panic!("expected ConstraintViolation, got {:?}", other),
        }
    }

    #[test]
    fn bad_hex_is_constraint_violation() {
        assert!(matches!(
            parse_range("0xZZZ", "0x1000"),
            Err(LedgerError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn missing_version_is_parse_error() {
        let xml = r#"<Policy project="P"><MPU name="M"><PRTn index="0" start="0x0" end="0x1"/></MPU></Policy>"#;
        assert!(matches!(
            parse_policy_xml("noversion.xml", xml),
            Err(LedgerError::Parse { .. })
        ));
    }

    #[test]
    fn empty_document_is_parse_error() {
        let xml = r#"<Policy project="P" version="v1"><MPU name="M"/></Policy>"#;
        assert!(matches!(
            parse_policy_xml("empty.xml", xml),
            Err(LedgerError::Parse { .. })
        ));
    }

    #[test]
    fn source_hash_ignores_line_endings() {
        let crlf = SAMPLE.replace('\n', "\r\n");
        let a = parse_policy_xml("a.xml", SAMPLE).unwrap();
        let b = parse_policy_xml("b.xml", &crlf).unwrap();
        assert_eq!(a.source_hash, b.source_hash);
    }
}
