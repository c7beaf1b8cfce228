//! # Session Templates
//!
//! Extended Events session definitions sent with a create-session request.
//! Each statement carries a `{sessionName}` placeholder.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EngineType {
    Standalone,
    AzureSqlDb,
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::AzureSqlDb => write!(f, "azure_sql_db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTemplate {
    pub name: String,
    pub engine_type: EngineType,
    pub default_view: String,
    pub create_statement: String,
}

const SESSION_NAME_PLACEHOLDER: &str = "{sessionName}";

const STANDARD_ACTIONS: &str = "package0.event_sequence,sqlserver.client_app_name,\
sqlserver.client_pid,sqlserver.database_id,sqlserver.database_name,sqlserver.nt_username,\
sqlserver.query_hash,sqlserver.server_principal_name,sqlserver.session_id";

const TSQL_ACTIONS: &str = "package0.event_sequence,sqlserver.client_app_name,\
sqlserver.client_pid,sqlserver.database_id,sqlserver.database_name,sqlserver.server_principal_name,\
sqlserver.session_id";

const NOT_SYSTEM: &str = "WHERE ([package0].[equal_boolean]([sqlserver].[is_system],(0)))";

const SESSION_OPTIONS: &str = "WITH (MAX_MEMORY=8192 KB,EVENT_RETENTION_MODE=ALLOW_SINGLE_EVENT_LOSS,\
MAX_DISPATCH_LATENCY=5 SECONDS,MAX_EVENT_SIZE=0 KB,MEMORY_PARTITION_MODE=PER_CPU,\
TRACK_CAUSALITY=ON,STARTUP_STATE=OFF)";

impl SessionTemplate {
    /// The create statement with the session name substituted.
    pub fn render(&self, session_name: &str) -> String {
        self.create_statement
            .replace(SESSION_NAME_PLACEHOLDER, session_name)
    }

    pub fn builtin() -> Vec<Self> {
        vec![
            Self::build("Standard_OnPrem", EngineType::Standalone, "Standard View", &standard_events()),
            Self::build("TSQL_OnPrem", EngineType::Standalone, "TSQL View", &tsql_events()),
            Self::build("Standard_Azure", EngineType::AzureSqlDb, "Standard View", &standard_events()),
            Self::build("TSQL_Azure", EngineType::AzureSqlDb, "TSQL View", &tsql_events()),
        ]
    }

    pub fn find(name: &str) -> Option<Self> {
        Self::builtin()
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn build(name: &str, engine_type: EngineType, default_view: &str, events: &[String]) -> Self {
        let scope = match engine_type {
            EngineType::Standalone => "SERVER",
            EngineType::AzureSqlDb => "DATABASE",
        };
        let create_statement = format!(
            "CREATE EVENT SESSION [{placeholder}] ON {scope}\n{events}\n\
             ADD TARGET package0.ring_buffer(SET max_events_limit=(1000),max_memory=(51200))\n\
             {options}",
            placeholder = SESSION_NAME_PLACEHOLDER,
            scope = scope,
            events = events.join(",\n"),
            options = SESSION_OPTIONS,
        );
        Self {
            name: name.to_string(),
            engine_type,
            default_view: default_view.to_string(),
            create_statement,
        }
    }
}

fn add_event(event: &str, actions: &str, collect_options: bool, filtered: bool) -> String {
    let set = if collect_options {
        "SET collect_options_text=(1)\n    "
    } else {
        ""
    };
    let predicate = if filtered { NOT_SYSTEM } else { "" };
    format!("ADD EVENT sqlserver.{event}({set}ACTION({actions}) {predicate})")
}

fn standard_events() -> Vec<String> {
    vec![
        add_event("attention", STANDARD_ACTIONS, false, true),
        add_event("existing_connection", STANDARD_ACTIONS, true, false),
        add_event("login", STANDARD_ACTIONS, true, false),
        add_event("logout", STANDARD_ACTIONS, false, false),
        add_event("rpc_completed", STANDARD_ACTIONS, false, true),
        add_event("sql_batch_completed", STANDARD_ACTIONS, false, true),
        add_event("sql_batch_starting", STANDARD_ACTIONS, false, true),
    ]
}

fn tsql_events() -> Vec<String> {
    vec![
        add_event("existing_connection", TSQL_ACTIONS, true, false),
        add_event("login", TSQL_ACTIONS, true, false),
        add_event("logout", TSQL_ACTIONS, false, false),
        add_event("rpc_starting", TSQL_ACTIONS, false, true),
        add_event("sql_batch_starting", TSQL_ACTIONS, false, true),
    ]
}
