use crate::context::ScenarioContext;
use crate::error::{HadrError, Result};
use hadr_kernel::policy::ExecutionPolicy;
use hadr_kernel::validator::{Validator, ValidatorProgress};
use hadr_model::admin::{BackupKind, BackupRequest};
use hadr_model::ReplicaSpec;

/// Proves the backup share round-trips: the primary writes a throwaway
/// database backup into it and every new data secondary reads the header
/// back through its own platform's path.
#[derive(Debug)]
pub struct BackupLocationValidator {
    ctx: ScenarioContext,
}

impl BackupLocationValidator {
    /// Display name.
    pub const NAME: &'static str = "Checking shared network location";

    /// Checks the primary and every new data secondary.
    pub fn new(ctx: ScenarioContext) -> Self {
        Self { ctx }
    }

    fn scratch_name() -> String {
        format!("BackupLocDb_{}", uuid::Uuid::new_v4().simple())
    }

    fn location_for(&self, replica: &ReplicaSpec) -> Result<String> {
        self.ctx
            .topology()
            .backup_path_for(replica.platform)
            .map(str::to_string)
            .ok_or_else(|| HadrError::BackupLocationMissing {
                group: self.ctx.group().to_string(),
                platform: replica.platform.to_string(),
            })
    }

    fn check_readers(&self, scratch: &str, progress: &ValidatorProgress<'_>) -> Result<()> {
        let file_name = format!("{scratch}.bak");
        let readers: Vec<&ReplicaSpec> = self
            .ctx
            .topology()
            .data_secondaries()
            .filter(|r| r.is_new())
            .collect();

        for replica in readers {
            let location = self.location_for(replica)?;
            let Some(device) = self
                .ctx
                .topology()
                .backup_device_for(replica.platform, &file_name)
            else {
                continue;
            };
            let headers = self
                .ctx
                .admin()
                .read_backup_header(replica.connection(), &device)
                .map_err(|source| HadrError::SecondaryCannotReadLocation {
                    replica: replica.name.clone(),
                    location: location.clone(),
                    reason: "the backup header could not be read".into(),
                    source: Some(source),
                })?;
            let readable = headers.len() == 1
                && headers[0].database_name.eq_ignore_ascii_case(scratch);
            if !readable {
                return Err(HadrError::SecondaryCannotReadLocation {
                    replica: replica.name.clone(),
                    location,
                    reason: format!("expected one backup of '{scratch}', found {}", headers.len()),
                    source: None,
                });
            }
            progress.report(format!("{} can read {location}", replica.name), "Running");
        }
        Ok(())
    }
}

impl Validator for BackupLocationValidator {
    type Error = HadrError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, policy: &mut dyn ExecutionPolicy, progress: &ValidatorProgress<'_>) -> Result<()> {
        policy.expire();
        let primary = self.ctx.primary()?;
        let location = self.location_for(primary)?;
        let scratch = Self::scratch_name();
        let Some(device) = self
            .ctx
            .topology()
            .backup_device_for(primary.platform, &format!("{scratch}.bak"))
        else {
            return Err(HadrError::BackupLocationMissing {
                group: self.ctx.group().to_string(),
                platform: primary.platform.to_string(),
            });
        };

        let admin = self.ctx.admin();
        admin
            .create_database(primary.connection(), &scratch)
            .map_err(|e| HadrError::admin("Create scratch database", e))?;

        let request = BackupRequest {
            database: scratch.clone(),
            device,
            kind: BackupKind::Full,
        };
        let result = match admin.backup(primary.connection(), &request) {
            Ok(()) => self.check_readers(&scratch, progress),
            Err(source) => Err(HadrError::PrimaryCannotWriteToLocation {
                server: primary.name.clone(),
                location,
                source,
            }),
        };

        if let Err(e) = admin.drop_database(primary.connection(), &scratch) {
            tracing::warn!(database = %scratch, error = %e, "failed to drop the backup scratch database");
        }
        result
    }
}
