//! Statement rendering
//!
//! Pure functions turning administration calls into Transact-SQL text. Used
//! for capture-mode scripts and for the operations log of
//! [`InMemoryAdmin`](super::InMemoryAdmin).

use super::{BackupKind, BackupRequest, EndpointDefinition, RestoreRequest};
use crate::database::Secret;
use crate::listener::ListenerSpec;
use crate::replica::ReplicaSpec;
use crate::snapshot::TopologySnapshot;
use crate::types::{AvailabilityMode, MirroringRole};

/// `[name]`, doubling any closing bracket.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `N'text'`, doubling any single quote.
pub fn quote_literal(text: &str) -> String {
    format!("N'{}'", text.replace('\'', "''"))
}

/// Windows login for a service account.
pub fn create_login(login: &str) -> String {
    format!("CREATE LOGIN {} FROM WINDOWS", quote_ident(login))
}

/// Stopped endpoint with its role and encryption.
pub fn create_endpoint(endpoint: &EndpointDefinition) -> String {
    format!(
        "CREATE ENDPOINT {} STATE = STOPPED AS TCP (LISTENER_PORT = {}) \
         FOR DATABASE_MIRRORING (ROLE = {}, ENCRYPTION = {} ALGORITHM AES)",
        quote_ident(&endpoint.name),
        endpoint.port,
        endpoint.role.keyword(),
        endpoint.encryption.keyword()
    )
}

/// Change the role an endpoint accepts.
pub fn alter_endpoint_role(endpoint: &str, role: MirroringRole) -> String {
    format!(
        "ALTER ENDPOINT {} FOR DATABASE_MIRRORING (ROLE = {})",
        quote_ident(endpoint),
        role.keyword()
    )
}

/// Set the endpoint state to started.
pub fn start_endpoint(endpoint: &str) -> String {
    format!("ALTER ENDPOINT {} STATE = STARTED", quote_ident(endpoint))
}

/// Drop the endpoint.
pub fn drop_endpoint(endpoint: &str) -> String {
    format!("DROP ENDPOINT {}", quote_ident(endpoint))
}

/// Let `login` connect to the endpoint.
pub fn grant_connect(endpoint: &str, login: &str) -> String {
    format!(
        "GRANT CONNECT ON ENDPOINT::{} TO {}",
        quote_ident(endpoint),
        quote_ident(login)
    )
}

/// Configure the health session to start with the server, then start it.
pub fn start_xevent_session(session: &str) -> String {
    format!(
        "IF EXISTS (SELECT * FROM sys.server_event_sessions WHERE name = {lit}) \
         BEGIN ALTER EVENT SESSION {id} ON SERVER WITH (STARTUP_STATE = ON); END; \
         IF NOT EXISTS (SELECT * FROM sys.dm_xe_sessions WHERE name = {lit}) \
         BEGIN ALTER EVENT SESSION {id} ON SERVER STATE = START; END",
        lit = quote_literal(session),
        id = quote_ident(session)
    )
}

fn replica_clause(topology: &TopologySnapshot, replica: &ReplicaSpec) -> String {
    let mut clause = format!(
        "{} WITH (ENDPOINT_URL = {}, AVAILABILITY_MODE = {}, FAILOVER_MODE = {}",
        quote_literal(&replica.name),
        quote_literal(&replica.endpoint_url()),
        replica.availability_mode.keyword(),
        replica.failover_mode.keyword()
    );
    if replica.is_data_secondary() || replica.is_primary() {
        clause.push_str(&format!(
            ", BACKUP_PRIORITY = {}, SECONDARY_ROLE(ALLOW_CONNECTIONS = {}",
            replica.backup_priority,
            replica.readable_secondary.keyword()
        ));
        if let Some(url) = &replica.read_only_routing_url {
            clause.push_str(&format!(", READ_ONLY_ROUTING_URL = {}", quote_literal(url)));
        }
        clause.push(')');
        if !replica.read_only_routing_list.is_empty() {
            let list: Vec<String> = replica
                .read_only_routing_list
                .iter()
                .map(|r| quote_literal(r))
                .collect();
            clause.push_str(&format!(
                ", PRIMARY_ROLE(READ_ONLY_ROUTING_LIST = ({}))",
                list.join(", ")
            ));
        }
    }
    if replica.availability_mode != AvailabilityMode::ConfigurationOnly
        && topology.will_perform_automatic_seeding()
    {
        clause.push_str(", SEEDING_MODE = AUTOMATIC");
    }
    clause.push(')');
    clause
}

/// `CREATE AVAILABILITY GROUP` with every replica and new database.
pub fn create_availability_group(topology: &TopologySnapshot) -> String {
    let mut options = vec![
        format!("CLUSTER_TYPE = {}", topology.cluster_type.keyword()),
        format!("DB_FAILOVER = {}", on_off(topology.database_health_trigger)),
        format!("DTC_SUPPORT = {}", if topology.dtc_support { "PER_DB" } else { "NONE" }),
        format!(
            "REQUIRED_SYNCHRONIZED_SECONDARIES_TO_COMMIT = {}",
            topology.required_synchronized_secondaries_to_commit
        ),
    ];
    if topology.is_basic {
        options.push("BASIC".to_string());
    }
    if topology.is_contained {
        options.push("CONTAINED".to_string());
        if topology.reuse_system_databases {
            options.push("REUSE_SYSTEM_DATABASES".to_string());
        }
    }

    let databases: Vec<String> = topology
        .new_databases
        .iter()
        .map(|d| quote_ident(&d.name))
        .collect();
    let replicas: Vec<String> = topology
        .replicas
        .iter()
        .map(|r| replica_clause(topology, r))
        .collect();

    let mut statement = format!(
        "CREATE AVAILABILITY GROUP {} WITH ({})",
        quote_ident(&topology.group_name),
        options.join(", ")
    );
    if !databases.is_empty() {
        statement.push_str(&format!(" FOR DATABASE {}", databases.join(", ")));
    }
    statement.push_str(&format!(" REPLICA ON {}", replicas.join(", ")));
    statement
}

/// `ADD REPLICA` for `replicas` on an existing group.
pub fn add_replicas(topology: &TopologySnapshot, replicas: &[&ReplicaSpec]) -> String {
    let clauses: Vec<String> = replicas
        .iter()
        .map(|r| replica_clause(topology, r))
        .collect();
    format!(
        "ALTER AVAILABILITY GROUP {} ADD REPLICA ON {}",
        quote_ident(&topology.group_name),
        clauses.join(", ")
    )
}

/// Run on a secondary. Grants database creation under automatic seeding.
pub fn join_group(topology: &TopologySnapshot) -> String {
    let mut statement = format!(
        "ALTER AVAILABILITY GROUP {} JOIN WITH (CLUSTER_TYPE = {})",
        quote_ident(&topology.group_name),
        topology.cluster_type.keyword()
    );
    if topology.will_perform_automatic_seeding() {
        statement.push_str(&format!(
            "; ALTER AVAILABILITY GROUP {} GRANT CREATE ANY DATABASE",
            quote_ident(&topology.group_name)
        ));
    }
    statement
}

/// `ADD LISTENER`, with DHCP or static addresses.
pub fn create_listener(group: &str, listener: &ListenerSpec) -> String {
    let addresses = if listener.dhcp {
        match listener.addresses.first() {
            Some(subnet) => format!(
                "WITH DHCP ON ({}, {})",
                quote_literal(&subnet.address),
                quote_literal(subnet.subnet_mask.as_deref().unwrap_or_default())
            ),
            None => "WITH DHCP".to_string(),
        }
    } else {
        let list: Vec<String> = listener
            .addresses
            .iter()
            .map(|a| match &a.subnet_mask {
                Some(mask) => format!("({}, {})", quote_literal(&a.address), quote_literal(mask)),
                None => format!("({})", quote_literal(&a.address)),
            })
            .collect();
        format!("WITH IP ({})", list.join(", "))
    };
    format!(
        "ALTER AVAILABILITY GROUP {} ADD LISTENER {} ({}, PORT = {})",
        quote_ident(group),
        quote_literal(&listener.name),
        addresses,
        listener.port
    )
}

/// `ADD DATABASE` for every name in `databases`.
pub fn add_databases(group: &str, databases: &[&str]) -> String {
    let list: Vec<String> = databases.iter().map(|d| quote_ident(d)).collect();
    format!(
        "ALTER AVAILABILITY GROUP {} ADD DATABASE {}",
        quote_ident(group),
        list.join(", ")
    )
}

/// Lets automatic seeding create databases on a secondary.
pub fn grant_create_any_database(group: &str) -> String {
    format!(
        "ALTER AVAILABILITY GROUP {} GRANT CREATE ANY DATABASE",
        quote_ident(group)
    )
}

/// Empty database, used for the backup share check.
pub fn create_database(name: &str) -> String {
    format!("CREATE DATABASE {}", quote_ident(name))
}

/// Drop a database.
pub fn drop_database(name: &str) -> String {
    format!("DROP DATABASE {}", quote_ident(name))
}

/// Full or log backup to the request's device.
pub fn backup(request: &BackupRequest) -> String {
    let verb = match request.kind {
        BackupKind::Full => "DATABASE",
        BackupKind::Log => "LOG",
    };
    format!(
        "BACKUP {verb} {} TO DISK = {} WITH FORMAT, INIT, COMPRESSION",
        quote_ident(&request.database),
        quote_literal(&request.device)
    )
}

/// Restore `WITH NORECOVERY`, relocating files as requested.
pub fn restore(request: &RestoreRequest) -> String {
    let verb = match request.kind {
        BackupKind::Full => "DATABASE",
        BackupKind::Log => "LOG",
    };
    let mut options = vec!["NORECOVERY".to_string()];
    options.extend(request.relocate.iter().map(|m| {
        format!(
            "MOVE {} TO {}",
            quote_literal(&m.logical_name),
            quote_literal(&m.path)
        )
    }));
    format!(
        "RESTORE {verb} {} FROM DISK = {} WITH {}",
        quote_ident(&request.database),
        quote_literal(&request.device),
        options.join(", ")
    )
}

/// Run on a secondary whose copy is restoring.
pub fn join_database(group: &str, database: &str) -> String {
    format!(
        "ALTER DATABASE {} SET HADR AVAILABILITY GROUP = {}",
        quote_ident(database),
        quote_ident(group)
    )
}

/// The password is always rendered redacted.
pub fn add_database_credential(database: &str, password: &Secret) -> String {
    format!(
        "EXEC sp_control_dbmasterkey_password @db_name = {}, @password = N'{password}', @action = N'add'",
        quote_literal(database)
    )
}

/// Planned failover, or forced when data loss is allowed.
pub fn failover(group: &str, allow_data_loss: bool) -> String {
    if allow_data_loss {
        format!(
            "ALTER AVAILABILITY GROUP {} FORCE_FAILOVER_ALLOW_DATA_LOSS",
            quote_ident(group)
        )
    } else {
        format!("ALTER AVAILABILITY GROUP {} FAILOVER", quote_ident(group))
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON"
    } else {
        "OFF"
    }
}
