//! Blocking smart HTTP client: ref discovery over
//! `GET <url>/info/refs?service=...`, pack download over
//! `POST <url>/git-upload-pack`, and pack upload over
//! `POST <url>/git-receive-pack`. Credentials come from a pluggable
//! provider (environment tokens by default); idempotent discovery GETs are
//! retried a bounded number of times on transport errors.

use std::io::Read;
use std::str::FromStr;

use base64::Engine;
use bytes::{Bytes, BytesMut};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    protocol::{
        advertisement::RefAdvertisement,
        pkt::{self, PktLine, add_pkt_line_string, read_pkt_line, write_flush},
        types::{
            CLIENT_AGENT, Capability, PushReport, RefPushResult, RefUpdate, ServiceType,
        },
    },
};

/// Negotiation keeps requests small: at most this many `have` tips.
const MAX_HAVES: usize = 256;
/// Bounded retry for idempotent GETs.
const GET_RETRIES: usize = 2;

/// Credentials for the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Basic { username: String, password: String },
    Bearer(String),
}

impl Credential {
    /// Token from the environment: `RSGIT_TOKEN`, then `GITHUB_TOKEN`.
    pub fn from_env() -> Credential {
        for var in ["RSGIT_TOKEN", "GITHUB_TOKEN"] {
            if let Ok(token) = std::env::var(var) {
                if !token.is_empty() {
                    return Credential::Bearer(token);
                }
            }
        }
        Credential::Anonymous
    }

    fn authorization_header(&self) -> Option<String> {
        match self {
            Credential::Anonymous => None,
            Credential::Basic { username, password } => {
                let raw = format!("{username}:{password}");
                Some(format!(
                    "Basic {}",
                    base64::engine::general_purpose::STANDARD.encode(raw)
                ))
            }
            Credential::Bearer(token) => Some(format!("Bearer {token}")),
        }
    }
}

/// Rewrite SSH-style `user@host:path` remotes to HTTPS and append the
/// `.git` suffix when absent.
pub fn normalize_url(url: &str) -> String {
    let mut normalized = if url.starts_with("http://") || url.starts_with("https://") {
        url.trim_end_matches('/').to_string()
    } else if let Some((userhost, path)) = url.split_once(':') {
        let host = userhost.rsplit_once('@').map(|(_, h)| h).unwrap_or(userhost);
        format!("https://{host}/{}", path.trim_start_matches('/'))
    } else {
        format!("https://{url}")
    };
    if !normalized.ends_with(".git") {
        normalized.push_str(".git");
    }
    normalized
}

/// One remote endpoint.
pub struct HttpClient {
    base_url: String,
    agent: ureq::Agent,
    credential: Credential,
}

impl HttpClient {
    /// Client for a remote URL, credentials sourced from the environment.
    pub fn new(url: &str) -> HttpClient {
        Self::with_credential(url, Credential::from_env())
    }

    pub fn with_credential(url: &str, credential: Credential) -> HttpClient {
        HttpClient {
            base_url: normalize_url(url),
            agent: ureq::Agent::new_with_defaults(),
            credential,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_error(e: ureq::Error) -> GitError {
        match e {
            ureq::Error::StatusCode(401) => GitError::AuthRequired,
            ureq::Error::StatusCode(403) => GitError::AuthFailed("forbidden".to_string()),
            ureq::Error::StatusCode(code) => GitError::NetworkError {
                status: Some(code),
                message: "unexpected HTTP status".to_string(),
            },
            other => GitError::network(other.to_string()),
        }
    }

    fn read_body(
        response: &mut ureq::http::Response<ureq::Body>,
    ) -> Result<Vec<u8>, GitError> {
        let mut buf = Vec::new();
        response
            .body_mut()
            .as_reader()
            .read_to_end(&mut buf)
            .map_err(|e| GitError::network(e.to_string()))?;
        Ok(buf)
    }

    /// `GET /info/refs?service=...`: discover refs and capabilities.
    /// Transport errors retry a bounded number of times (the request is
    /// idempotent); HTTP status errors do not.
    pub fn discover_refs(&self, service: ServiceType) -> Result<RefAdvertisement, GitError> {
        let url = format!("{}/info/refs?service={service}", self.base_url);
        let mut last_err = None;
        for attempt in 0..=GET_RETRIES {
            let mut request = self.agent.get(url.as_str());
            if let Some(auth) = self.credential.authorization_header() {
                request = request.header("Authorization", auth.as_str());
            }
            match request.call() {
                Ok(mut response) => {
                    let body = Self::read_body(&mut response)?;
                    tracing::debug!(url = %url, bytes = body.len(), "ref discovery complete");
                    return RefAdvertisement::parse(Bytes::from(body), service);
                }
                Err(e @ ureq::Error::StatusCode(_)) => return Err(Self::map_error(e)),
                Err(e) => {
                    tracing::debug!(url = %url, attempt, error = %e, "discovery attempt failed");
                    last_err = Some(Self::map_error(e));
                }
            }
        }
        Err(last_err.expect("loop ran at least once"))
    }

    fn post(
        &self,
        endpoint: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, GitError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut request = self
            .agent
            .post(url.as_str())
            .header("Content-Type", content_type);
        if let Some(auth) = self.credential.authorization_header() {
            request = request.header("Authorization", auth.as_str());
        }
        let mut response = request.send(body).map_err(Self::map_error)?;
        Self::read_body(&mut response)
    }

    /// Build the upload-pack request body: `want` lines (capabilities on
    /// the first), optional `deepen`, flush, bounded `have` lines, `done`.
    fn fetch_request(
        wants: &[ObjectHash],
        haves: &[ObjectHash],
        depth: Option<u32>,
        advertised: &[Capability],
    ) -> (BytesMut, bool) {
        let mut caps = Vec::new();
        let mut sideband = false;
        for cap in [
            Capability::MultiAck,
            Capability::SideBand64k,
            Capability::ThinPack,
            Capability::OfsDelta,
        ] {
            if advertised.contains(&cap) {
                if cap == Capability::SideBand64k {
                    sideband = true;
                }
                caps.push(cap.to_string());
            }
        }
        caps.push(CLIENT_AGENT.to_string());

        let mut buf = BytesMut::new();
        for (i, want) in wants.iter().enumerate() {
            if i == 0 {
                add_pkt_line_string(&mut buf, format!("want {want} {}\n", caps.join(" ")));
            } else {
                add_pkt_line_string(&mut buf, format!("want {want}\n"));
            }
        }
        if let Some(depth) = depth {
            add_pkt_line_string(&mut buf, format!("deepen {depth}\n"));
        }
        write_flush(&mut buf);
        for have in haves.iter().take(MAX_HAVES) {
            add_pkt_line_string(&mut buf, format!("have {have}\n"));
        }
        add_pkt_line_string(&mut buf, "done\n".to_string());
        (buf, sideband)
    }

    /// `POST /git-upload-pack`: negotiate and download a pack. Progress
    /// text from sideband channel 2 is forwarded to `progress`.
    pub fn fetch_pack(
        &self,
        wants: &[ObjectHash],
        haves: &[ObjectHash],
        depth: Option<u32>,
        advertised: &[Capability],
        progress: &mut dyn FnMut(&str),
    ) -> Result<Vec<u8>, GitError> {
        if wants.is_empty() {
            return Err(GitError::network("fetch with no wants"));
        }
        let (request, sideband) = Self::fetch_request(wants, haves, depth, advertised);
        let body = self.post(
            "git-upload-pack",
            "application/x-git-upload-pack-request",
            &request,
        )?;
        let pack = pkt::demux_sideband(Bytes::from(body), sideband, progress)?;
        if pack.is_empty() {
            return Err(GitError::network("server sent no pack data"));
        }
        tracing::debug!(bytes = pack.len(), "pack downloaded");
        Ok(pack)
    }

    /// `POST /git-receive-pack`: send ref updates plus a pack, parse the
    /// report-status reply.
    pub fn push_pack(
        &self,
        updates: &[RefUpdate],
        pack: &[u8],
    ) -> Result<PushReport, GitError> {
        if updates.is_empty() {
            return Err(GitError::network("push with no ref updates"));
        }
        let mut buf = BytesMut::new();
        for (i, update) in updates.iter().enumerate() {
            let line = if i == 0 {
                format!(
                    "{} {} {}\0report-status {CLIENT_AGENT}\n",
                    update.old, update.new, update.name
                )
            } else {
                format!("{} {} {}\n", update.old, update.new, update.name)
            };
            add_pkt_line_string(&mut buf, line);
        }
        write_flush(&mut buf);
        buf.extend_from_slice(pack);

        let body = self.post(
            "git-receive-pack",
            "application/x-git-receive-pack-request",
            &buf,
        )?;
        Self::parse_push_report(Bytes::from(body))
    }

    fn parse_push_report(mut body: Bytes) -> Result<PushReport, GitError> {
        let mut report = PushReport::default();
        while let Some(pkt) = read_pkt_line(&mut body)? {
            let data = match pkt {
                PktLine::Data(d) => d,
                PktLine::Flush => continue,
                _ => break,
            };
            // Servers may wrap the report in sideband channel 1.
            let data = if data.first() == Some(&1u8) {
                data.slice(1..)
            } else {
                data
            };
            let line = String::from_utf8_lossy(&data);
            let line = line.trim_end_matches('\n');
            if let Some(rest) = line.strip_prefix("unpack ") {
                report.unpack_ok = rest == "ok";
            } else if let Some(rest) = line.strip_prefix("ok ") {
                report.results.push(RefPushResult {
                    name: rest.to_string(),
                    ok: true,
                    message: None,
                });
            } else if let Some(rest) = line.strip_prefix("ng ") {
                let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
                report.results.push(RefPushResult {
                    name: name.to_string(),
                    ok: false,
                    message: Some(reason.to_string()),
                });
            }
        }
        Ok(report)
    }
}

impl FromStr for Credential {
    type Err = GitError;

    /// `user:pass` parses to Basic; anything else is a bearer token.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Credential::Anonymous);
        }
        match s.split_once(':') {
            Some((user, pass)) => Ok(Credential::Basic {
                username: user.to_string(),
                password: pass.to_string(),
            }),
            None => Ok(Credential::Bearer(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::{Credential, HttpClient, normalize_url};
    use crate::{
        hash::ObjectHash,
        protocol::{
            pkt::{PktLine, add_pkt_line_string, read_pkt_line, write_flush},
            types::Capability,
        },
    };

    /// SSH-style URLs rewrite to HTTPS and gain the `.git` suffix.
    #[test]
    fn url_normalization() {
        assert_eq!(
            normalize_url("git@example.com:org/repo"),
            "https://example.com/org/repo.git"
        );
        assert_eq!(
            normalize_url("https://example.com/org/repo.git"),
            "https://example.com/org/repo.git"
        );
        assert_eq!(
            normalize_url("https://example.com/org/repo/"),
            "https://example.com/org/repo.git"
        );
    }

    /// Credential parsing and header formatting.
    #[test]
    fn credentials() {
        let basic: Credential = "user:secret".parse().unwrap();
        assert_eq!(
            basic.authorization_header().unwrap(),
            // base64("user:secret")
            "Basic dXNlcjpzZWNyZXQ="
        );
        let bearer: Credential = "tok123".parse().unwrap();
        assert_eq!(bearer.authorization_header().unwrap(), "Bearer tok123");
        let anon: Credential = "".parse().unwrap();
        assert_eq!(anon.authorization_header(), None);
    }

    /// The fetch request carries capabilities only on the first want,
    /// bounds haves, and terminates with done.
    #[test]
    fn fetch_request_shape() {
        let wants = vec![ObjectHash([1; 20]), ObjectHash([2; 20])];
        let haves: Vec<ObjectHash> = (0..300).map(|i| ObjectHash([(i % 256) as u8; 20])).collect();
        let advertised = vec![Capability::SideBand64k, Capability::OfsDelta];

        let (buf, sideband) = HttpClient::fetch_request(&wants, &haves, Some(1), &advertised);
        assert!(sideband);

        let mut bytes = buf.freeze();
        let mut lines = Vec::new();
        while let Some(pkt) = read_pkt_line(&mut bytes).unwrap() {
            match pkt {
                PktLine::Data(d) => lines.push(String::from_utf8_lossy(&d).to_string()),
                PktLine::Flush => lines.push("FLUSH".to_string()),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(lines[0].starts_with(&format!("want {}", wants[0])));
        assert!(lines[0].contains("side-band-64k"));
        assert!(lines[0].contains("ofs-delta"));
        assert!(!lines[0].contains("thin-pack"), "not advertised");
        assert_eq!(lines[1], format!("want {}\n", wants[1]));
        assert_eq!(lines[2], "deepen 1\n");
        assert_eq!(lines[3], "FLUSH");
        let have_count = lines.iter().filter(|l| l.starts_with("have ")).count();
        assert_eq!(have_count, super::MAX_HAVES);
        assert_eq!(lines.last().unwrap(), "done\n");
    }

    /// report-status parsing covers ok, ng, and sideband-wrapped lines.
    #[test]
    fn push_report_parsing() {
        let mut buf = BytesMut::new();
        add_pkt_line_string(&mut buf, "unpack ok\n".to_string());
        add_pkt_line_string(&mut buf, "ok refs/heads/main\n".to_string());
        add_pkt_line_string(
            &mut buf,
            "ng refs/heads/locked non-fast-forward\n".to_string(),
        );
        write_flush(&mut buf);

        let report = HttpClient::parse_push_report(Bytes::from(buf.freeze())).unwrap();
        assert!(report.unpack_ok);
        assert!(!report.all_ok());
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].ok);
        assert_eq!(report.results[1].name, "refs/heads/locked");
        assert_eq!(
            report.results[1].message.as_deref(),
            Some("non-fast-forward")
        );
    }
}
