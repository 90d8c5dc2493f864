//! Pipeline actions: copy certificate files, exec a command, restart.

use std::fmt;
use std::time::Duration;

use crate::error::{ActionError, LabelError};
use crate::policies::OnErrorPolicy;
use crate::subscribers::docker::backend::{ContainerBackend, ExecSpec, FileBlob};
use crate::tracking::Invocation;

/// Default copy file name template.
pub(crate) const DEFAULT_FILE_NAME: &str = "{{.Domain}}.{{.Extension}}";
/// Default timeout of a restart action.
pub(crate) const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout of restarts triggered by a `restart-*` on-error policy.
pub(crate) const ON_ERROR_RESTART_TIMEOUT: Duration = Duration::from_secs(10);
/// File mode of copied certificate and key files.
const FILE_MODE: u32 = 0o600;

/// One step of a container's pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub on_error: OnErrorPolicy,
    pub kind: ActionKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Copy(CopyAction),
    Exec(ExecAction),
    Restart(RestartAction),
}

/// Encoding of copied certificate material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CopyFormat {
    /// Two files: `<name>.crt` with the chain and `<name>.key` with the key.
    #[default]
    Pem,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyAction {
    pub destination: String,
    pub file_name: FileNameTemplate,
    pub format: CopyFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecAction {
    pub command: String,
    pub args: Vec<String>,
    pub user: Option<String>,
    pub work_dir: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartAction {
    pub timeout: Duration,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self.kind {
            ActionKind::Copy(_) => "copy",
            ActionKind::Exec(_) => "exec",
            ActionKind::Restart(_) => "restart",
        }
    }

    /// Runs the action against container `id`.
    pub async fn execute(
        &self,
        backend: &dyn ContainerBackend,
        id: &str,
        invocation: &Invocation,
    ) -> Result<(), ActionError> {
        match &self.kind {
            ActionKind::Copy(copy) => {
                let blobs = copy.blobs(invocation)?;
                backend.copy(id, &copy.destination, &blobs).await?;
            }
            ActionKind::Exec(exec) => backend.exec(id, &exec.spec()).await?,
            ActionKind::Restart(restart) => backend.restart(id, restart.timeout).await?,
        }
        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ActionKind::Copy(c) => write!(f, "copy to {}", c.destination)?,
            ActionKind::Exec(e) => write!(f, "exec {}", e.command)?,
            ActionKind::Restart(r) => write!(f, "restart ({:?})", r.timeout)?,
        }
        write!(f, " [on-error {}]", self.on_error)
    }
}

impl CopyAction {
    /// Files to place in the destination directory.
    pub(crate) fn blobs(&self, invocation: &Invocation) -> Result<Vec<FileBlob>, ActionError> {
        match self.format {
            CopyFormat::Pem => {
                let cert = &invocation.certificate;
                Ok(vec![
                    FileBlob {
                        name: self.file_name.render(&invocation.domain, "crt")?,
                        contents: cert.cert().to_vec(),
                        mode: FILE_MODE,
                    },
                    FileBlob {
                        name: self.file_name.render(&invocation.domain, "key")?,
                        contents: cert.key().to_vec(),
                        mode: FILE_MODE,
                    },
                ])
            }
        }
    }
}

impl ExecAction {
    pub(crate) fn spec(&self) -> ExecSpec {
        let mut command = Vec::with_capacity(1 + self.args.len());
        command.push(self.command.clone());
        command.extend(self.args.iter().cloned());
        ExecSpec {
            command,
            user: self.user.clone(),
            work_dir: self.work_dir.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Domain,
    Extension,
}

/// File name template with `{{.Domain}}` and `{{.Extension}}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileNameTemplate {
    segments: Vec<Segment>,
}

impl FileNameTemplate {
    /// Parses a template; whitespace inside the braces is allowed.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = raw.trim();

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| format!("unterminated placeholder in `{raw}`"))?;
            segments.push(match after[..end].trim() {
                ".Domain" => Segment::Domain,
                ".Extension" => Segment::Extension,
                other => return Err(format!("unknown placeholder `{other}`")),
            });
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn render(&self, domain: &str, extension: &str) -> Result<String, ActionError> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Domain => out.push_str(domain),
                Segment::Extension => out.push_str(extension),
            }
        }
        if out.is_empty() {
            return Err(ActionError::EmptyFileName);
        }
        Ok(out)
    }
}

impl Default for FileNameTemplate {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Domain,
                Segment::Literal(".".into()),
                Segment::Extension,
            ],
        }
    }
}

/// Builds a template for action `index`, mapping failures to a label error.
pub(crate) fn parse_file_name(index: usize, raw: &str) -> Result<FileNameTemplate, LabelError> {
    FileNameTemplate::parse(raw).map_err(|reason| LabelError::InvalidField {
        index,
        field: "filename",
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::Certificate;
    use std::sync::Arc;

    fn invocation() -> Invocation {
        Invocation {
            domain: "a.example.com".into(),
            certificate: Arc::new(Certificate::new(
                vec!["a.example.com".into()],
                b"CHAIN".to_vec(),
                b"SECRET".to_vec(),
            )),
            data: "c1".into(),
        }
    }

    #[test]
    fn test_default_template_matches_parsed_default() {
        assert_eq!(
            FileNameTemplate::parse(DEFAULT_FILE_NAME).unwrap(),
            FileNameTemplate::default()
        );
    }

    #[test]
    fn test_template_render() {
        let t = FileNameTemplate::parse(" tls/{{ .Domain }}-cert.{{.Extension}} ").unwrap();
        assert_eq!(t.render("a.example.com", "crt").unwrap(), "tls/a.example.com-cert.crt");

        let fixed = FileNameTemplate::parse("server.pem").unwrap();
        assert_eq!(fixed.render("x", "key").unwrap(), "server.pem");
    }

    #[test]
    fn test_template_rejects_unknown_or_unterminated() {
        assert!(FileNameTemplate::parse("{{.Name}}").is_err());
        assert!(FileNameTemplate::parse("{{.Domain").is_err());
    }

    #[test]
    fn test_empty_template_fails_at_render() {
        let t = FileNameTemplate::parse("").unwrap();
        assert!(matches!(t.render("a", "crt"), Err(ActionError::EmptyFileName)));
    }

    #[test]
    fn test_pem_blobs() {
        let copy = CopyAction {
            destination: "/certs".into(),
            file_name: FileNameTemplate::default(),
            format: CopyFormat::Pem,
        };
        let blobs = copy.blobs(&invocation()).unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].name, "a.example.com.crt");
        assert_eq!(blobs[0].contents, b"CHAIN");
        assert_eq!(blobs[1].name, "a.example.com.key");
        assert_eq!(blobs[1].contents, b"SECRET");
        assert!(blobs.iter().all(|b| b.mode == 0o600));
    }

    #[test]
    fn test_exec_spec_prepends_command() {
        let exec = ExecAction {
            command: "nginx".into(),
            args: vec!["-s".into(), "reload".into()],
            user: Some("root".into()),
            work_dir: None,
        };
        let spec = exec.spec();
        assert_eq!(spec.command, vec!["nginx", "-s", "reload"]);
        assert_eq!(spec.user.as_deref(), Some("root"));
    }
}
