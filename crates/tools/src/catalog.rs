//! The fixed capability set exposed to the model.

use kestrel_agents::tool_registry::{
    CapabilityDescriptor, CapabilityRegistry, ParamKind, ParamSpec, RegistryError,
};

/// Module types accepted by `msf_run_module`.
pub const MODULE_TYPES: &[&str] = &["exploit", "auxiliary", "post"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Scan,
    MsfSearch,
    MsfRunModule,
    MsfExploit,
    MsfSessions,
    MsfSessionCommand,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Scan,
        Capability::MsfSearch,
        Capability::MsfRunModule,
        Capability::MsfExploit,
        Capability::MsfSessions,
        Capability::MsfSessionCommand,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Scan => "scan",
            Capability::MsfSearch => "msf_search",
            Capability::MsfRunModule => "msf_run_module",
            Capability::MsfExploit => "msf_exploit",
            Capability::MsfSessions => "msf_sessions",
            Capability::MsfSessionCommand => "msf_session_command",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn descriptor(self) -> CapabilityDescriptor {
        match self {
            Capability::Scan => CapabilityDescriptor::new(
                self.name(),
                "Run an nmap port scan against a host or network from the scanning box. \
                 Only these flags are honoured: -T4 -F -O -sV -sC -sU -Pn -n, plus one port \
                 selector such as -p22,80,443, -p1-1024 or -p-. Other flags are dropped; \
                 with no usable flags a fast default scan (-T4 -F) runs.",
                vec![
                    ParamSpec::required(
                        "target",
                        ParamKind::String,
                        "Host name, IP address or CIDR range to scan",
                    ),
                    ParamSpec::optional("flags", ParamKind::StringList, "nmap flags, one per item"),
                ],
            ),
            Capability::MsfSearch => CapabilityDescriptor::new(
                self.name(),
                "Search Metasploit modules by keyword (CVE, product, service name). \
                 Returns matching modules with their type, full name and rank.",
                vec![ParamSpec::required("keyword", ParamKind::String, "Search keyword")],
            ),
            Capability::MsfRunModule => CapabilityDescriptor::new(
                self.name(),
                "Run a Metasploit module in a temporary console and return its output. \
                 Use auxiliary modules for scanners and checks, post modules against an \
                 existing session.",
                vec![
                    ParamSpec::required("module_type", ParamKind::String, "Module type")
                        .one_of(MODULE_TYPES),
                    ParamSpec::required(
                        "module_name",
                        ParamKind::String,
                        "Module path without the type, e.g. scanner/smb/smb_version",
                    ),
                    ParamSpec::optional(
                        "options",
                        ParamKind::Object,
                        "Module options such as {\"RHOSTS\": \"10.0.0.5\"}",
                    ),
                ],
            ),
            Capability::MsfExploit => CapabilityDescriptor::new(
                self.name(),
                "Launch an exploit with a payload as a background job. Returns the job id; \
                 check msf_sessions afterwards for new sessions.",
                vec![
                    ParamSpec::required(
                        "exploit",
                        ParamKind::String,
                        "Exploit module path, e.g. unix/ftp/vsftpd_234_backdoor",
                    ),
                    ParamSpec::required(
                        "payload",
                        ParamKind::String,
                        "Payload module path, e.g. cmd/unix/interact",
                    ),
                    ParamSpec::optional("options", ParamKind::Object, "Exploit and payload options"),
                ],
            ),
            Capability::MsfSessions => CapabilityDescriptor::new(
                self.name(),
                "List open Metasploit sessions with their type, target and the exploit that \
                 created them.",
                vec![],
            ),
            Capability::MsfSessionCommand => CapabilityDescriptor::new(
                self.name(),
                "Run one command inside an open shell or meterpreter session and return \
                 its output.",
                vec![
                    ParamSpec::required("session_id", ParamKind::Id, "Session id from msf_sessions"),
                    ParamSpec::required("command", ParamKind::String, "Single-line command to run"),
                ],
            ),
        }
    }
}

/// Registry holding every built-in capability, in advertisement order.
pub fn builtin_registry() -> Result<CapabilityRegistry, RegistryError> {
    CapabilityRegistry::new(Capability::ALL.into_iter().map(Capability::descriptor).collect())
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn registry_lists_all_capabilities_in_order() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.names(), vec![
            "scan",
            "msf_search",
            "msf_run_module",
            "msf_exploit",
            "msf_sessions",
            "msf_session_command",
        ]);
    }

    #[test]
    fn names_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(Capability::from_name(capability.name()), Some(capability));
        }
        assert_eq!(Capability::from_name("delete_everything"), None);
    }

    #[test]
    fn run_module_enumerates_module_types() {
        let registry = builtin_registry().unwrap();
        let schema = registry.get("msf_run_module").unwrap().input_schema();
        assert_eq!(
            schema["properties"]["module_type"]["enum"],
            json!(["exploit", "auxiliary", "post"])
        );
        assert_eq!(schema["required"], json!(["module_type", "module_name"]));
    }

    #[test]
    fn session_id_accepts_strings_and_integers() {
        let registry = builtin_registry().unwrap();
        let descriptor = registry.get("msf_session_command").unwrap();
        for id in [json!(1), json!("1")] {
            let args = json!({ "session_id": id, "command": "id" });
            assert!(descriptor.validate(args.as_object().unwrap()).is_ok());
        }
    }
}
