//! Ref advertisement parsing: the response to
//! `GET <url>/info/refs?service=...`. The first pkt-line names the service,
//! a flush follows, then one pkt-line per ref. The first ref line carries a
//! NUL-separated capability list, including the `symref=HEAD:...` pointer
//! to the default branch.

use std::str::FromStr;

use bytes::Bytes;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    protocol::{
        pkt::{PktLine, read_pkt_line},
        types::{Capability, ServiceType},
    },
};

/// Parsed advertisement.
#[derive(Debug, Clone, Default)]
pub struct RefAdvertisement {
    /// Advertised refs in order, `HEAD` included when present.
    pub refs: Vec<(String, ObjectHash)>,
    pub capabilities: Vec<Capability>,
    /// Short name of the branch HEAD symrefs to, from `symref=HEAD:...`.
    pub default_branch: Option<String>,
}

impl RefAdvertisement {
    /// Whether the server advertised a capability.
    pub fn supports(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Value of an advertised ref.
    pub fn resolve(&self, name: &str) -> Option<ObjectHash> {
        self.refs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, h)| *h)
    }

    /// Advertised HEAD commit, if any.
    pub fn head(&self) -> Option<ObjectHash> {
        self.resolve("HEAD")
    }

    /// Parse a smart HTTP advertisement body.
    pub fn parse(mut body: Bytes, service: ServiceType) -> Result<RefAdvertisement, GitError> {
        let mut adv = RefAdvertisement::default();
        let mut seen_service_line = false;
        let mut seen_first_ref = false;

        while let Some(pkt) = read_pkt_line(&mut body)? {
            let data = match pkt {
                PktLine::Data(d) => d,
                PktLine::Flush | PktLine::Delim => continue,
                PktLine::ResponseEnd => break,
            };
            let line = String::from_utf8_lossy(&data);
            let line = line.trim_end_matches('\n');

            if !seen_service_line && line.starts_with("# service=") {
                let advertised = line.trim_start_matches("# service=");
                if advertised != service.to_string() {
                    return Err(GitError::network(format!(
                        "expected {service} advertisement, got {advertised}"
                    )));
                }
                seen_service_line = true;
                continue;
            }

            let (ref_part, caps_part) = match line.split_once('\0') {
                Some((r, c)) => (r, Some(c)),
                None => (line, None),
            };

            if !seen_first_ref {
                seen_first_ref = true;
                if let Some(caps) = caps_part {
                    for cap in caps.split_whitespace() {
                        if let Ok(capability) = cap.parse::<Capability>() {
                            if let Capability::Symref(symref) = &capability {
                                if let Some(target) = symref
                                    .strip_prefix("HEAD:refs/heads/")
                                {
                                    adv.default_branch = Some(target.to_string());
                                }
                            }
                            adv.capabilities.push(capability);
                        }
                    }
                }
            } else if caps_part.is_some() {
                return Err(GitError::network(
                    "capabilities repeated after the first ref line",
                ));
            }

            let (hash_hex, name) = ref_part
                .split_once(' ')
                .ok_or_else(|| GitError::network(format!("malformed ref line: {ref_part:?}")))?;
            let hash = ObjectHash::from_str(hash_hex)?;

            // An empty repository advertises `<zero> capabilities^{}`.
            if name == "capabilities^{}" {
                continue;
            }
            adv.refs.push((name.to_string(), hash));
        }

        Ok(adv)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::RefAdvertisement;
    use crate::protocol::{
        pkt::{add_pkt_line_string, write_flush},
        types::{Capability, ServiceType},
    };

    const HASH1: &str = "1111111111111111111111111111111111111111";
    const HASH2: &str = "2222222222222222222222222222222222222222";

    fn build_advertisement() -> bytes::Bytes {
        let mut buf = BytesMut::new();
        add_pkt_line_string(&mut buf, "# service=git-upload-pack\n".to_string());
        write_flush(&mut buf);
        add_pkt_line_string(
            &mut buf,
            format!(
                "{HASH1} HEAD\0multi_ack side-band-64k thin-pack ofs-delta \
                 symref=HEAD:refs/heads/main agent=git/2.43.0\n"
            ),
        );
        add_pkt_line_string(&mut buf, format!("{HASH1} refs/heads/main\n"));
        add_pkt_line_string(&mut buf, format!("{HASH2} refs/heads/feat\n"));
        write_flush(&mut buf);
        buf.freeze()
    }

    /// Service preamble, refs, capabilities, and symref all parse.
    #[test]
    fn parse_full_advertisement() {
        let adv =
            RefAdvertisement::parse(build_advertisement(), ServiceType::UploadPack).unwrap();
        assert_eq!(adv.refs.len(), 3);
        assert_eq!(adv.head().unwrap().to_string(), HASH1);
        assert_eq!(
            adv.resolve("refs/heads/feat").unwrap().to_string(),
            HASH2
        );
        assert_eq!(adv.default_branch.as_deref(), Some("main"));
        assert!(adv.supports(&Capability::SideBand64k));
        assert!(adv.supports(&Capability::OfsDelta));
        assert!(adv.supports(&Capability::ThinPack));
        assert!(!adv.supports(&Capability::ReportStatus));
    }

    /// An empty repository advertises only the capabilities placeholder.
    #[test]
    fn parse_empty_repository() {
        let mut buf = BytesMut::new();
        add_pkt_line_string(&mut buf, "# service=git-upload-pack\n".to_string());
        write_flush(&mut buf);
        add_pkt_line_string(
            &mut buf,
            format!(
                "{} capabilities^{{}}\0report-status delete-refs\n",
                "0".repeat(40)
            ),
        );
        write_flush(&mut buf);

        let adv =
            RefAdvertisement::parse(buf.freeze(), ServiceType::UploadPack).unwrap();
        assert!(adv.refs.is_empty());
        assert!(adv.supports(&Capability::ReportStatus));
    }

    /// A mismatched service preamble is rejected.
    #[test]
    fn rejects_wrong_service() {
        let err =
            RefAdvertisement::parse(build_advertisement(), ServiceType::ReceivePack).unwrap_err();
        assert!(err.to_string().contains("git-receive-pack"));
    }
}
