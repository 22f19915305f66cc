// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certificate lifecycle policy: one active certificate per subject,
// renewal windows, expiry reporting.

use std::sync::Arc;

use attesta_core::cancel::Cancellation;
use attesta_core::config::LifecycleConfig;
use attesta_core::error::{AttestaError, Result};
use attesta_core::store::CertificateStore;
use attesta_core::types::{
    Certificate, CertificateInfo, CertificateRequest, CertificateStats, CertificateStatus,
    IssuedCertificate, SUPERSEDED_REASON, SubjectId,
};
use attesta_security::{AuditAction, AuditLog};
use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

use crate::authority::CertificateAuthority;

/// Policy layer over [`CertificateAuthority`] and a [`CertificateStore`].
pub struct CertificateLifecycleManager {
    ca: Arc<CertificateAuthority>,
    store: Arc<dyn CertificateStore>,
    config: LifecycleConfig,
    audit: Option<Arc<AuditLog>>,
}

impl CertificateLifecycleManager {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        store: Arc<dyn CertificateStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            ca,
            store,
            config,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn authority(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    fn record(
        &self,
        action: AuditAction,
        subject: &SubjectId,
        target: &str,
        ok: bool,
        details: Option<&str>,
    ) {
        if let Some(log) = &self.audit {
            log.record_quietly(action, &subject.to_string(), target, ok, details);
        }
    }

    /// Issue and persist a certificate for a subject with no valid one.
    ///
    /// Key generation runs without any lock held; the store re-checks the
    /// one-active-certificate rule atomically when inserting, so of two
    /// racing requests for one subject exactly one is stored.
    #[instrument(skip_all, fields(subject_id = %request.subject_id))]
    pub fn request_certificate(
        &self,
        request: &CertificateRequest,
        cancel: &Cancellation,
    ) -> Result<IssuedCertificate> {
        let active = self.store.active_for_subject(&request.subject_id, Utc::now())?;
        if let Some(existing) = active.first() {
            self.record(
                AuditAction::Issue,
                &request.subject_id,
                &existing.serial_number,
                false,
                Some("subject already holds a valid certificate"),
            );
            return Err(AttestaError::Conflict(format!(
                "subject {} already holds valid certificate {}",
                request.subject_id, existing.serial_number
            )));
        }

        let issued = self.ca.issue_certificate(request, cancel)?;
        if let Err(e) = self.store.insert_exclusive(&issued.certificate, Utc::now()) {
            warn!(error = %e, "issued certificate not stored");
            self.record(
                AuditAction::Issue,
                &request.subject_id,
                &issued.certificate.serial_number,
                false,
                Some(e.kind()),
            );
            return Err(e);
        }
        self.record(
            AuditAction::Issue,
            &request.subject_id,
            &issued.certificate.serial_number,
            true,
            None,
        );
        Ok(issued)
    }

    /// Replace a certificate close to expiry.  The new certificate is
    /// stored and the old one revoked with reason `"superseded"` in one
    /// atomic store call; on failure neither change is visible.
    #[instrument(skip(self, cancel))]
    pub fn renew_certificate(&self, serial: &str, cancel: &Cancellation) -> Result<IssuedCertificate> {
        let old = self.require(serial)?;
        if old.revoked {
            return Err(AttestaError::Revoked(format!(
                "certificate {serial} has been revoked and cannot be renewed"
            )));
        }

        let now = Utc::now();
        let remaining = old.days_remaining(now);
        if remaining > i64::from(self.config.renewal_window_days) {
            return Err(AttestaError::Validation(format!(
                "certificate {serial} has {remaining} days remaining; renewal opens at {} days",
                self.config.renewal_window_days
            )));
        }

        let request = CertificateRequest::new(old.subject_id, old.subject.clone());
        let issued = self.ca.issue_certificate(&request, cancel)?;
        if let Err(e) = self
            .store
            .supersede(&issued.certificate, serial, SUPERSEDED_REASON, now)
        {
            warn!(old_serial = %serial, error = %e, "renewal not stored");
            self.record(AuditAction::Renew, &old.subject_id, serial, false, Some(e.kind()));
            return Err(e);
        }

        info!(
            old_serial = %serial,
            new_serial = %issued.certificate.serial_number,
            "certificate renewed"
        );
        self.record(
            AuditAction::Renew,
            &old.subject_id,
            &issued.certificate.serial_number,
            true,
            Some(&format!("supersedes {serial}")),
        );
        Ok(issued)
    }

    /// Revoke by serial.  `Ok(false)` when it was already revoked.
    #[instrument(skip(self))]
    pub fn revoke_certificate(&self, serial: &str, reason: &str) -> Result<bool> {
        let mut cert = self.require(serial)?;
        if !self.ca.revoke_certificate(&mut cert, reason) {
            return Ok(false);
        }
        let at = cert.revoked_at.unwrap_or_else(Utc::now);
        let changed = self.store.mark_revoked(serial, reason, at)?;
        if changed {
            self.record(AuditAction::Revoke, &cert.subject_id, serial, true, Some(reason));
        }
        Ok(changed)
    }

    pub fn get_certificate(&self, serial: &str) -> Result<Option<Certificate>> {
        self.store.get_by_serial(serial)
    }

    /// The subject's current non-revoked, unexpired certificate.
    pub fn active_certificate(&self, subject_id: &SubjectId) -> Result<Certificate> {
        self.store
            .active_for_subject(subject_id, Utc::now())?
            .into_iter()
            .next_back()
            .ok_or_else(|| {
                AttestaError::NotFound(format!("no valid certificate for subject {subject_id}"))
            })
    }

    /// Composed verification of a stored certificate, revocation included.
    pub fn verify_certificate(&self, serial: &str) -> Result<CertificateInfo> {
        let cert = self.require(serial)?;
        self.ca.verify_certificate_record(&cert)
    }

    /// Unrevoked certificates expiring within `days` from now.
    pub fn list_expiring(&self, days: u32) -> Result<Vec<Certificate>> {
        let now = Utc::now();
        self.store.list_expiring(now, now + Duration::days(i64::from(days)))
    }

    pub fn get_certificate_stats(&self) -> Result<CertificateStats> {
        let now = Utc::now();
        let soon = i64::from(self.config.expiring_soon_days);
        let mut stats = CertificateStats::default();

        for cert in self.store.list_all()? {
            stats.total += 1;
            match cert.status_at(now) {
                CertificateStatus::Revoked => stats.revoked += 1,
                CertificateStatus::Expired => stats.expired += 1,
                CertificateStatus::Valid => {
                    stats.active += 1;
                    if cert.days_remaining(now) <= soon {
                        stats.expiring_soon += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Report unrevoked certificates past expiry.  Expiry is derived from
    /// time, so this changes no state and is safe to run at any moment.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<Certificate> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|c| c.status_at(now) == CertificateStatus::Expired)
            .collect();

        for cert in &expired {
            warn!(serial = %cert.serial_number, subject_id = %cert.subject_id, "certificate expired");
        }
        if let Some(log) = &self.audit {
            log.record_quietly(
                AuditAction::ExpirySweep,
                "-",
                "certificates",
                true,
                Some(&format!("{} expired", expired.len())),
            );
        }
        info!(expired = expired.len(), "expiry sweep complete");
        Ok(expired.len())
    }

    fn require(&self, serial: &str) -> Result<Certificate> {
        self.store
            .get_by_serial(serial)?
            .ok_or_else(|| AttestaError::NotFound(format!("certificate {serial}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteCertificateStore;
    use attesta_core::config::CaConfig;
    use attesta_core::types::SubjectFields;
    use attesta_security::EncryptionService;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteCertificateStore>,
        audit: Arc<AuditLog>,
        manager: CertificateLifecycleManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = CaConfig {
            data_dir: dir.path().to_path_buf(),
            root_key_bits: 2048,
            ..CaConfig::default()
        };
        let key = EncryptionService::generate_key().unwrap();
        let enc = Arc::new(EncryptionService::new(&key).unwrap());
        let ca = Arc::new(CertificateAuthority::generate(&config, enc).unwrap());
        let store = Arc::new(SqliteCertificateStore::open_in_memory().unwrap());
        let audit = Arc::new(AuditLog::open_in_memory().unwrap());
        let manager = CertificateLifecycleManager::new(ca, store.clone(), LifecycleConfig::default())
            .with_audit(audit.clone());
        Fixture {
            _dir: dir,
            store,
            audit,
            manager,
        }
    }

    /// Delegates to SQLite but fails the atomic renewal write.
    struct FailingSupersede(SqliteCertificateStore);

    impl CertificateStore for FailingSupersede {
        fn insert(&self, c: &Certificate) -> Result<()> {
            self.0.insert(c)
        }
        fn insert_exclusive(&self, c: &Certificate, now: chrono::DateTime<Utc>) -> Result<()> {
            self.0.insert_exclusive(c, now)
        }
        fn supersede(
            &self,
            _new: &Certificate,
            _old_serial: &str,
            _reason: &str,
            _at: chrono::DateTime<Utc>,
        ) -> Result<()> {
            Err(AttestaError::Database("disk full".into()))
        }
        fn get_by_serial(&self, serial: &str) -> Result<Option<Certificate>> {
            self.0.get_by_serial(serial)
        }
        fn list_for_subject(&self, subject_id: &SubjectId) -> Result<Vec<Certificate>> {
            self.0.list_for_subject(subject_id)
        }
        fn active_for_subject(
            &self,
            subject_id: &SubjectId,
            now: chrono::DateTime<Utc>,
        ) -> Result<Vec<Certificate>> {
            self.0.active_for_subject(subject_id, now)
        }
        fn mark_revoked(&self, serial: &str, reason: &str, at: chrono::DateTime<Utc>) -> Result<bool> {
            self.0.mark_revoked(serial, reason, at)
        }
        fn list_expiring(
            &self,
            from: chrono::DateTime<Utc>,
            until: chrono::DateTime<Utc>,
        ) -> Result<Vec<Certificate>> {
            self.0.list_expiring(from, until)
        }
        fn list_all(&self) -> Result<Vec<Certificate>> {
            self.0.list_all()
        }
    }

    fn request(subject: SubjectId, days: u32) -> CertificateRequest {
        CertificateRequest::new(subject, SubjectFields::new("Jane Doe")).validity_days(days)
    }

    #[test]
    fn second_request_conflicts() {
        let f = fixture();
        let subject = SubjectId::new();
        let none = Cancellation::none();

        f.manager.request_certificate(&request(subject, 365), &none).unwrap();
        let err = f.manager.request_certificate(&request(subject, 365), &none).unwrap_err();

        assert!(matches!(err, AttestaError::Conflict(_)));
        assert_eq!(f.store.list_for_subject(&subject).unwrap().len(), 1);
    }

    #[test]
    fn request_allowed_after_revocation() {
        let f = fixture();
        let subject = SubjectId::new();
        let none = Cancellation::none();

        let first = f.manager.request_certificate(&request(subject, 365), &none).unwrap();
        assert!(f.manager.revoke_certificate(&first.certificate.serial_number, "lost").unwrap());
        f.manager.request_certificate(&request(subject, 365), &none).unwrap();

        assert_eq!(f.store.list_for_subject(&subject).unwrap().len(), 2);
        assert_eq!(f.store.active_for_subject(&subject, Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn renewal_outside_window_rejected() {
        let f = fixture();
        let subject = SubjectId::new();
        let issued = f
            .manager
            .request_certificate(&request(subject, 365), &Cancellation::none())
            .unwrap();

        let err = f
            .manager
            .renew_certificate(&issued.certificate.serial_number, &Cancellation::none())
            .unwrap_err();
        assert!(matches!(err, AttestaError::Validation(_)));
    }

    #[test]
    fn renewal_supersedes_old_certificate() {
        let f = fixture();
        let subject = SubjectId::new();
        let old = f
            .manager
            .request_certificate(&request(subject, 10), &Cancellation::none())
            .unwrap();
        let old_serial = old.certificate.serial_number;

        let renewed = f.manager.renew_certificate(&old_serial, &Cancellation::none()).unwrap();
        assert_ne!(renewed.certificate.serial_number, old_serial);
        assert_eq!(renewed.certificate.subject, old.certificate.subject);

        let old = f.manager.get_certificate(&old_serial).unwrap().unwrap();
        assert!(old.revoked);
        assert_eq!(old.revocation_reason.as_deref(), Some(SUPERSEDED_REASON));

        let active = f.manager.active_certificate(&subject).unwrap();
        assert_eq!(active.serial_number, renewed.certificate.serial_number);
        assert!(matches!(
            f.manager.renew_certificate(&old_serial, &Cancellation::none()),
            Err(AttestaError::Revoked(_))
        ));
    }

    #[test]
    fn failed_renewal_leaves_old_certificate_in_place() {
        let f = fixture();
        let store = Arc::new(FailingSupersede(SqliteCertificateStore::open_in_memory().unwrap()));
        let manager = CertificateLifecycleManager::new(
            f.manager.authority().clone(),
            store.clone(),
            LifecycleConfig::default(),
        );
        let subject = SubjectId::new();
        let old = manager
            .request_certificate(&request(subject, 10), &Cancellation::none())
            .unwrap();
        let old_serial = old.certificate.serial_number;

        let err = manager.renew_certificate(&old_serial, &Cancellation::none()).unwrap_err();
        assert!(matches!(err, AttestaError::Database(_)));

        let certs = store.list_for_subject(&subject).unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].serial_number, old_serial);
        assert!(!certs[0].revoked);
        assert_eq!(store.active_for_subject(&subject, Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_requests_store_one_certificate() {
        let f = fixture();
        let subject = SubjectId::new();

        let results: Vec<Result<IssuedCertificate>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let manager = &f.manager;
                    scope.spawn(move || {
                        manager.request_certificate(&request(subject, 365), &Cancellation::none())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AttestaError::Conflict(_))));
        assert_eq!(f.store.list_for_subject(&subject).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_revocation_keeps_first_reason() {
        let f = fixture();
        let issued = f
            .manager
            .request_certificate(&request(SubjectId::new(), 365), &Cancellation::none())
            .unwrap();
        let serial = issued.certificate.serial_number;

        let winners: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let manager = &f.manager;
                    let serial = serial.as_str();
                    scope.spawn(move || {
                        let reason = format!("reason {i}");
                        manager
                            .revoke_certificate(serial, &reason)
                            .unwrap()
                            .then_some(reason)
                    })
                })
                .collect();
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(winners.len(), 1);
        let stored = f.manager.get_certificate(&serial).unwrap().unwrap();
        assert_eq!(stored.revocation_reason.as_deref(), Some(winners[0].as_str()));
        let revocations = f
            .audit
            .entries_for_target(&serial)
            .unwrap()
            .into_iter()
            .filter(|e| e.action == "revoke")
            .count();
        assert_eq!(revocations, 1);
    }

    #[test]
    fn revoked_certificate_fails_composed_verification() {
        let f = fixture();
        let subject = SubjectId::new();
        let issued = f
            .manager
            .request_certificate(&request(subject, 365), &Cancellation::none())
            .unwrap();
        let serial = issued.certificate.serial_number;

        assert!(f.manager.verify_certificate(&serial).unwrap().is_valid);
        assert!(f.manager.revoke_certificate(&serial, "key compromise").unwrap());
        assert!(!f.manager.revoke_certificate(&serial, "again").unwrap());

        let err = f.manager.verify_certificate(&serial).unwrap_err();
        assert!(matches!(err, AttestaError::Revoked(_)));
        assert!(err.to_string().contains("revoked"));
        assert_eq!(
            f.manager.get_certificate(&serial).unwrap().unwrap().revocation_reason.as_deref(),
            Some("key compromise")
        );
    }

    #[test]
    fn unknown_serial_is_not_found() {
        let f = fixture();
        assert!(matches!(f.manager.verify_certificate("123"), Err(AttestaError::NotFound(_))));
        assert!(matches!(f.manager.revoke_certificate("123", "x"), Err(AttestaError::NotFound(_))));
        assert!(matches!(
            f.manager.active_certificate(&SubjectId::new()),
            Err(AttestaError::NotFound(_))
        ));
    }

    #[test]
    fn stats_expiry_listing_and_sweep() {
        let f = fixture();
        let none = Cancellation::none();
        f.manager.request_certificate(&request(SubjectId::new(), 365), &none).unwrap();
        let soon = f.manager.request_certificate(&request(SubjectId::new(), 5), &none).unwrap();
        let revoked = f.manager.request_certificate(&request(SubjectId::new(), 365), &none).unwrap();
        f.manager.revoke_certificate(&revoked.certificate.serial_number, "test").unwrap();

        // An already-expired row, as found after downtime.
        let mut stale = soon.certificate.clone();
        stale.id = uuid::Uuid::new_v4();
        stale.serial_number = "1".into();
        stale.expires_at = Utc::now() - Duration::days(2);
        f.store.insert(&stale).unwrap();

        let stats = f.manager.get_certificate_stats().unwrap();
        assert_eq!(
            stats,
            CertificateStats {
                total: 4,
                active: 2,
                revoked: 1,
                expired: 1,
                expiring_soon: 1,
            }
        );

        let expiring = f.manager.list_expiring(30).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].serial_number, soon.certificate.serial_number);

        assert_eq!(f.manager.sweep_expired().unwrap(), 1);
        assert_eq!(f.manager.sweep_expired().unwrap(), 1);
        assert!(!f.audit.entries_for_target("certificates").unwrap().is_empty());
    }

    #[test]
    fn issuance_is_audited() {
        let f = fixture();
        let subject = SubjectId::new();
        let issued = f
            .manager
            .request_certificate(&request(subject, 365), &Cancellation::none())
            .unwrap();

        let entries = f.audit.entries_for_subject(&subject.to_string()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "issue");
        assert_eq!(entries[0].target, issued.certificate.serial_number);
        assert!(entries[0].success);
    }
}
