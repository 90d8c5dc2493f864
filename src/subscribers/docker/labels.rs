//! # Container label schema.
//!
//! ```text
//! <prefix>.domains                = a.example.com, b.example.com
//! <prefix>.actions[0]             = copy
//! <prefix>.actions[0].destination = /etc/nginx/certs
//! <prefix>.actions[0].filename    = {{.Domain}}.{{.Extension}}
//! <prefix>.actions[1]             = exec
//! <prefix>.actions[1].command     = nginx
//! <prefix>.actions[1].args[0]     = -s
//! <prefix>.actions[1].args[1]     = reload
//! <prefix>.actions[1].on-error    = restart-stop
//! ```
//!
//! Actions run in ascending index order; gaps are allowed. Any invalid entry
//! rejects the whole container.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;

use crate::config::parse_duration;
use crate::error::LabelError;
use crate::policies::OnErrorPolicy;
use crate::subscribers::docker::action::{
    Action, ActionKind, CopyAction, CopyFormat, DEFAULT_RESTART_TIMEOUT, ExecAction,
    FileNameTemplate, RestartAction, parse_file_name,
};

/// Registration derived from a container's labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerConfig {
    pub domains: Vec<String>,
    pub actions: Vec<Action>,
}

/// Label parser for one prefix.
#[derive(Clone, Debug)]
pub struct LabelParser {
    domains_key: String,
    action_key: Regex,
    arg_key: Regex,
}

#[derive(Default)]
struct RawAction {
    kind: Option<String>,
    fields: HashMap<String, String>,
}

impl LabelParser {
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(prefix);
        Ok(Self {
            domains_key: format!("{prefix}.domains"),
            action_key: Regex::new(&format!(r"^{escaped}\.actions\[(\d+)\](?:\.(.+))?$"))?,
            arg_key: Regex::new(r"^args\[(\d+)\]$")?,
        })
    }

    pub fn parse(&self, labels: &HashMap<String, String>) -> Result<ContainerConfig, LabelError> {
        let raw = labels
            .get(&self.domains_key)
            .ok_or(LabelError::MissingDomains)?;
        let domains: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
        if domains.is_empty() {
            return Err(LabelError::NoDomains);
        }

        let mut raw_actions: BTreeMap<usize, RawAction> = BTreeMap::new();
        for (key, value) in labels {
            let Some(caps) = self.action_key.captures(key) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<usize>() else {
                continue;
            };
            let entry = raw_actions.entry(index).or_default();
            match caps.get(2) {
                Some(field) => {
                    entry.fields.insert(field.as_str().to_string(), value.clone());
                }
                None => entry.kind = Some(value.trim().to_string()),
            }
        }
        if raw_actions.is_empty() {
            return Err(LabelError::NoActions);
        }

        let actions = raw_actions
            .into_iter()
            .map(|(index, raw)| self.action(index, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ContainerConfig { domains, actions })
    }

    fn action(&self, index: usize, raw: RawAction) -> Result<Action, LabelError> {
        let kind = raw.kind.ok_or(LabelError::MissingType { index })?;
        let fields = raw.fields;

        let on_error = match fields.get("on-error") {
            Some(v) => v.parse::<OnErrorPolicy>().map_err(|reason| LabelError::InvalidField {
                index,
                field: "on-error",
                reason,
            })?,
            None => OnErrorPolicy::default(),
        };

        let kind = match kind.to_ascii_lowercase().as_str() {
            "copy" => ActionKind::Copy(copy_action(index, &fields)?),
            "exec" => ActionKind::Exec(self.exec_action(index, &fields)?),
            "restart" => ActionKind::Restart(restart_action(index, &fields)?),
            _ => return Err(LabelError::UnknownType { index, kind }),
        };
        Ok(Action { on_error, kind })
    }

    fn exec_action(
        &self,
        index: usize,
        fields: &HashMap<String, String>,
    ) -> Result<ExecAction, LabelError> {
        let command = required(index, fields, "command")?;

        let mut args = BTreeMap::new();
        for (key, value) in fields {
            if let Some(caps) = self.arg_key.captures(key) {
                if let Ok(n) = caps[1].parse::<usize>() {
                    args.insert(n, value.clone());
                }
            }
        }

        Ok(ExecAction {
            command,
            args: args.into_values().collect(),
            user: optional(fields, "user"),
            work_dir: optional(fields, "workDir"),
        })
    }
}

fn copy_action(index: usize, fields: &HashMap<String, String>) -> Result<CopyAction, LabelError> {
    let destination = required(index, fields, "destination")?;
    let file_name = match fields.get("filename") {
        Some(raw) => parse_file_name(index, raw)?,
        None => FileNameTemplate::default(),
    };
    let format = match fields.get("format").map(|f| f.trim()) {
        None => CopyFormat::Pem,
        Some(f) if f.eq_ignore_ascii_case("pem") => CopyFormat::Pem,
        Some(f) => {
            return Err(LabelError::InvalidField {
                index,
                field: "format",
                reason: format!("unsupported format `{f}`"),
            });
        }
    };
    Ok(CopyAction {
        destination,
        file_name,
        format,
    })
}

fn restart_action(
    index: usize,
    fields: &HashMap<String, String>,
) -> Result<RestartAction, LabelError> {
    let timeout = match fields.get("timeout") {
        Some(raw) => parse_duration(raw).map_err(|e| LabelError::InvalidField {
            index,
            field: "timeout",
            reason: e.to_string(),
        })?,
        None => DEFAULT_RESTART_TIMEOUT,
    };
    Ok(RestartAction { timeout })
}

fn required(
    index: usize,
    fields: &HashMap<String, String>,
    field: &'static str,
) -> Result<String, LabelError> {
    optional(fields, field).ok_or(LabelError::MissingField { index, field })
}

fn optional(fields: &HashMap<String, String>, field: &str) -> Option<String> {
    fields
        .get(field)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parser() -> LabelParser {
        LabelParser::new("certvisor").unwrap()
    }

    #[test]
    fn test_full_registration() {
        let cfg = parser()
            .parse(&labels(&[
                ("certvisor.domains", " a.example.com, ,b.example.com,, "),
                ("certvisor.actions[0]", "copy"),
                ("certvisor.actions[0].destination", "/certs"),
                ("certvisor.actions[0].on-error", "Continue"),
                ("certvisor.actions[1]", "exec"),
                ("certvisor.actions[1].command", "nginx"),
                ("certvisor.actions[1].args[1]", "reload"),
                ("certvisor.actions[1].args[0]", "-s"),
                ("certvisor.actions[1].workDir", "/srv"),
                ("certvisor.actions[2]", "restart"),
                ("certvisor.actions[2].timeout", "30s"),
                ("unrelated.label", "x"),
            ]))
            .unwrap();

        assert_eq!(cfg.domains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(cfg.actions.len(), 3);

        assert_eq!(cfg.actions[0].on_error, OnErrorPolicy::Continue);
        match &cfg.actions[0].kind {
            ActionKind::Copy(c) => {
                assert_eq!(c.destination, "/certs");
                assert_eq!(c.file_name, FileNameTemplate::default());
            }
            other => panic!("expected copy, got {other:?}"),
        }

        assert_eq!(cfg.actions[1].on_error, OnErrorPolicy::Retry);
        match &cfg.actions[1].kind {
            ActionKind::Exec(e) => {
                assert_eq!(e.command, "nginx");
                assert_eq!(e.args, vec!["-s", "reload"]);
                assert_eq!(e.work_dir.as_deref(), Some("/srv"));
                assert_eq!(e.user, None);
            }
            other => panic!("expected exec, got {other:?}"),
        }

        match &cfg.actions[2].kind {
            ActionKind::Restart(r) => assert_eq!(r.timeout, Duration::from_secs(30)),
            other => panic!("expected restart, got {other:?}"),
        }
    }

    #[test]
    fn test_actions_sorted_numerically_with_gaps() {
        let cfg = parser()
            .parse(&labels(&[
                ("certvisor.domains", "a.example.com"),
                ("certvisor.actions[10]", "restart"),
                ("certvisor.actions[2]", "exec"),
                ("certvisor.actions[2].command", "true"),
            ]))
            .unwrap();
        assert_eq!(cfg.actions[0].name(), "exec");
        assert_eq!(cfg.actions[1].name(), "restart");
        match cfg.actions[1].kind {
            ActionKind::Restart(r) => assert_eq!(r.timeout, DEFAULT_RESTART_TIMEOUT),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_custom_prefix() {
        let parser = LabelParser::new("cert-watcher").unwrap();
        let cfg = parser
            .parse(&labels(&[
                ("cert-watcher.domains", "a.example.com"),
                ("cert-watcher.actions[0]", "restart"),
            ]))
            .unwrap();
        assert_eq!(cfg.actions.len(), 1);
    }

    #[test]
    fn test_rejections() {
        let p = parser();
        let cases: Vec<(Vec<(&str, &str)>, LabelError)> = vec![
            (vec![("certvisor.actions[0]", "restart")], LabelError::MissingDomains),
            (
                vec![("certvisor.domains", " , "), ("certvisor.actions[0]", "restart")],
                LabelError::NoDomains,
            ),
            (vec![("certvisor.domains", "a.example.com")], LabelError::NoActions),
            (
                vec![
                    ("certvisor.domains", "a.example.com"),
                    ("certvisor.actions[0].command", "x"),
                ],
                LabelError::MissingType { index: 0 },
            ),
            (
                vec![
                    ("certvisor.domains", "a.example.com"),
                    ("certvisor.actions[0]", "reboot"),
                ],
                LabelError::UnknownType {
                    index: 0,
                    kind: "reboot".into(),
                },
            ),
            (
                vec![
                    ("certvisor.domains", "a.example.com"),
                    ("certvisor.actions[3]", "copy"),
                ],
                LabelError::MissingField {
                    index: 3,
                    field: "destination",
                },
            ),
            (
                vec![
                    ("certvisor.domains", "a.example.com"),
                    ("certvisor.actions[0]", "exec"),
                ],
                LabelError::MissingField {
                    index: 0,
                    field: "command",
                },
            ),
        ];

        for (pairs, expected) in cases {
            assert_eq!(p.parse(&labels(&pairs)).unwrap_err(), expected, "{pairs:?}");
        }
    }

    #[test]
    fn test_invalid_fields_fail_closed() {
        let p = parser();
        for (field, value) in [
            ("on-error", "explode"),
            ("timeout", "soon"),
        ] {
            let key = format!("certvisor.actions[0].{field}");
            let err = p
                .parse(&labels(&[
                    ("certvisor.domains", "a.example.com"),
                    ("certvisor.actions[0]", "restart"),
                    (key.as_str(), value),
                ]))
                .unwrap_err();
            assert!(matches!(err, LabelError::InvalidField { index: 0, .. }), "{err:?}");
        }

        let err = p
            .parse(&labels(&[
                ("certvisor.domains", "a.example.com"),
                ("certvisor.actions[0]", "copy"),
                ("certvisor.actions[0].destination", "/certs"),
                ("certvisor.actions[0].format", "DER"),
            ]))
            .unwrap_err();
        assert!(matches!(err, LabelError::InvalidField { field: "format", .. }));
    }

    #[test]
    fn test_overflowing_restart_timeout_fails_closed() {
        let err = parser()
            .parse(&labels(&[
                ("certvisor.domains", "a.example.com"),
                ("certvisor.actions[0]", "restart"),
                ("certvisor.actions[0].timeout", "99999999999999999999h"),
            ]))
            .unwrap_err();
        assert!(matches!(err, LabelError::InvalidField { index: 0, field: "timeout", .. }));
    }
}
