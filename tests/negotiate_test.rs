//! Tests for the version negotiation and loading pipeline.
//!
//! Uses a fake kernel pseudo-filesystem in a tempdir and a mock transform
//! provider whose images carry their version in the first byte.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use polboot::image::PolicyImage;
use polboot::kernel::{BooleanState, Kernel, KernelError};
use polboot::negotiate::{load_policy, LoadError, LoadOptions};
use polboot::provider::{ParsedPolicy, PolicyTransformer, TransformError};

/// Fake policy format: byte 0 is the version, the rest is payload.
fn policy_bytes(version: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![version];
    bytes.extend_from_slice(payload);
    bytes
}

struct MockParsed {
    payload: Vec<u8>,
    version: u8,
    refuse_reencode: bool,
}

impl ParsedPolicy for MockParsed {
    fn set_version(&mut self, version: u32) -> Result<(), TransformError> {
        if self.refuse_reencode {
            return Err(TransformError::SetVersion {
                version,
                reason: "mock refuses this source version".to_owned(),
            });
        }
        self.version = u8::try_from(version).expect("test version fits in u8");
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, TransformError> {
        Ok(policy_bytes(self.version, &self.payload))
    }
}

#[derive(Default)]
struct MockTransformer {
    min: u32,
    max: u32,
    /// Source versions whose downgrade must fail.
    refuse_downgrade_of: Vec<u32>,
    fail_user_merge: bool,
    applied_booleans: RefCell<Option<Vec<BooleanState>>>,
    merged_booleans: RefCell<bool>,
}

impl MockTransformer {
    fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            ..Self::default()
        }
    }
}

impl PolicyTransformer for MockTransformer {
    fn min_version(&self) -> u32 {
        self.min
    }

    fn max_version(&self) -> u32 {
        self.max
    }

    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn ParsedPolicy>, TransformError> {
        let (first, payload) = bytes.split_first().ok_or_else(|| TransformError::Parse {
            reason: "empty image".to_owned(),
        })?;
        Ok(Box::new(MockParsed {
            payload: payload.to_vec(),
            version: *first,
            refuse_reencode: self.refuse_downgrade_of.contains(&u32::from(*first)),
        }))
    }

    fn merge_users(&self, bytes: &[u8], _users_dir: &Path) -> Result<Vec<u8>, TransformError> {
        if self.fail_user_merge {
            return Err(TransformError::Merge {
                reason: "mock user merge failure".to_owned(),
            });
        }
        let mut merged = bytes.to_vec();
        merged.extend_from_slice(b"+users");
        Ok(merged)
    }

    fn merge_booleans(
        &self,
        _bytes: &mut [u8],
        _booleans_path: &Path,
    ) -> Result<(), TransformError> {
        *self.merged_booleans.borrow_mut() = true;
        Ok(())
    }

    fn set_booleans(
        &self,
        _bytes: &mut [u8],
        settings: &[BooleanState],
    ) -> Result<(), TransformError> {
        *self.applied_booleans.borrow_mut() = Some(settings.to_vec());
        Ok(())
    }
}

/// Fake kernel filesystem plus a policy store in one tempdir.
struct Fixture {
    dir: tempfile::TempDir,
    kernel: Kernel,
}

impl Fixture {
    fn new(kernel_version: u32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mnt = dir.path().join("selinuxfs");
        fs::create_dir(&mnt).expect("mkdir mnt");
        fs::write(mnt.join("policyvers"), kernel_version.to_string()).expect("policyvers");
        fs::write(mnt.join("enforce"), "0").expect("enforce");
        fs::write(mnt.join("load"), "").expect("load");
        fs::create_dir(mnt.join("booleans")).expect("booleans");
        let kernel = Kernel::at_mount(&mnt);
        Self { dir, kernel }
    }

    fn store(&self) -> PathBuf {
        self.dir.path().join("policy")
    }

    fn write_policy(&self, version: u8, payload: &[u8]) {
        let path = self.dir.path().join(format!("policy.{version}"));
        fs::write(path, policy_bytes(version, payload)).expect("write policy");
    }

    fn set_boolean(&self, name: &str, active: bool) {
        let path = self
            .dir
            .path()
            .join("selinuxfs/booleans")
            .join(name);
        let value = if active { "1 1" } else { "0 0" };
        fs::write(path, value).expect("write boolean");
    }

    fn committed(&self) -> Vec<u8> {
        fs::read(self.dir.path().join("selinuxfs/load")).expect("read load")
    }

    fn options(&self) -> LoadOptions {
        LoadOptions {
            base_path: self.store(),
            set_local_defs: false,
            preserve_booleans: false,
            users_dir: self.dir.path().join("users"),
            booleans_path: self.dir.path().join("booleans.conf"),
            kernel_release: None,
        }
    }
}

#[test]
fn downgrade_failure_retries_at_older_version() {
    // Kernel 30, provider [28, 31], files at 31 and 29; the downgrade of
    // 31 fails, so the pipeline must fall back to the file at 29.
    let fx = Fixture::new(30);
    fx.write_policy(31, b"newest");
    fx.write_policy(29, b"older");
    let mut transformer = MockTransformer::new(28, 31);
    transformer.refuse_downgrade_of = vec![31];

    let loaded =
        load_policy(&fx.kernel, Some(&transformer), &fx.options()).expect("load succeeds");

    assert_eq!(loaded.version, 29);
    assert_eq!(fx.committed(), policy_bytes(29, b"older"));
}

#[test]
fn direct_load_without_provider() {
    // Kernel 30, only file is policy.30, no provider: direct load, no
    // transform involved.
    let fx = Fixture::new(30);
    fx.write_policy(30, b"stock");

    let loaded = load_policy(&fx.kernel, None, &fx.options()).expect("load succeeds");

    assert_eq!(loaded.version, 30);
    assert_eq!(loaded.source, fx.dir.path().join("policy.30"));
    assert_eq!(fx.committed(), policy_bytes(30, b"stock"));
}

#[test]
fn without_provider_only_kernel_version_is_tried() {
    // A newer file exists but without a provider the window is exactly the
    // kernel version, so the load must fail rather than pick it up.
    let fx = Fixture::new(30);
    fx.write_policy(31, b"too new");

    let error = load_policy(&fx.kernel, None, &fx.options()).expect_err("no candidate");
    match error {
        LoadError::NoCandidate { max_version, .. } => assert_eq!(max_version, 30),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn successful_downgrade_rewrites_version_only() {
    let fx = Fixture::new(30);
    fx.write_policy(31, b"payload");
    let transformer = MockTransformer::new(28, 31);

    let loaded =
        load_policy(&fx.kernel, Some(&transformer), &fx.options()).expect("load succeeds");

    assert_eq!(loaded.version, 30);
    assert_eq!(fx.committed(), policy_bytes(30, b"payload"));
    // The on-disk file is untouched.
    let on_disk = fs::read(fx.dir.path().join("policy.31")).expect("read");
    assert_eq!(on_disk, policy_bytes(31, b"payload"));
}

#[test]
fn version_exhaustion_after_repeated_downgrade_failures() {
    let fx = Fixture::new(30);
    fx.write_policy(31, b"a");
    let mut transformer = MockTransformer::new(30, 31);
    transformer.refuse_downgrade_of = vec![31];

    // Downgrade of 31 fails and no file exists at 30: exhaustion.
    let error =
        load_policy(&fx.kernel, Some(&transformer), &fx.options()).expect_err("exhausted");
    assert!(matches!(error, LoadError::NoCandidate { .. }));
}

#[test]
fn user_merge_failure_falls_back_to_unmerged_image() {
    let fx = Fixture::new(30);
    fx.write_policy(30, b"stock");
    let users_dir = fx.dir.path().join("users");
    fs::create_dir(&users_dir).expect("mkdir");
    fs::write(users_dir.join("local.users"), "user u roles r;").expect("write");

    let mut transformer = MockTransformer::new(28, 31);
    transformer.fail_user_merge = true;

    let mut opts = fx.options();
    opts.set_local_defs = true;
    opts.users_dir = users_dir;

    load_policy(&fx.kernel, Some(&transformer), &opts).expect("load succeeds");

    // Committed image is byte-identical to the pre-merge image.
    assert_eq!(fx.committed(), policy_bytes(30, b"stock"));
}

#[test]
fn user_merge_success_commits_merged_image() {
    let fx = Fixture::new(30);
    fx.write_policy(30, b"stock");
    let users_dir = fx.dir.path().join("users");
    fs::create_dir(&users_dir).expect("mkdir");
    fs::write(users_dir.join("local.users"), "user u roles r;").expect("write");

    let transformer = MockTransformer::new(28, 31);

    let mut opts = fx.options();
    opts.set_local_defs = true;
    opts.users_dir = users_dir;

    load_policy(&fx.kernel, Some(&transformer), &opts).expect("load succeeds");

    let mut expected = policy_bytes(30, b"stock");
    expected.extend_from_slice(b"+users");
    assert_eq!(fx.committed(), expected);
    // Local boolean merge also ran, since preservation was not requested.
    assert!(*transformer.merged_booleans.borrow());
}

#[test]
fn local_defs_skipped_when_no_definition_files_exist() {
    let fx = Fixture::new(30);
    fx.write_policy(30, b"stock");
    let transformer = MockTransformer::new(28, 31);

    let mut opts = fx.options();
    opts.set_local_defs = true;

    load_policy(&fx.kernel, Some(&transformer), &opts).expect("load succeeds");

    assert_eq!(fx.committed(), policy_bytes(30, b"stock"));
    assert!(!*transformer.merged_booleans.borrow());
}

#[test]
fn boolean_preservation_applies_snapshot() {
    let fx = Fixture::new(30);
    fx.write_policy(30, b"stock");
    fx.set_boolean("allow_execmem", true);
    fx.set_boolean("secure_mode", false);

    let transformer = MockTransformer::new(28, 31);

    let mut opts = fx.options();
    opts.preserve_booleans = true;

    load_policy(&fx.kernel, Some(&transformer), &opts).expect("load succeeds");

    let applied = transformer
        .applied_booleans
        .borrow()
        .clone()
        .expect("snapshot applied");
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0].name, "allow_execmem");
    assert!(applied[0].active);
    assert_eq!(applied[1].name, "secure_mode");
    assert!(!applied[1].active);
    // Preservation and local boolean merge are mutually exclusive.
    assert!(!*transformer.merged_booleans.borrow());
}

#[test]
fn modern_kernel_release_skips_preservation() {
    let fx = Fixture::new(30);
    fx.write_policy(30, b"stock");
    fx.set_boolean("allow_execmem", true);

    let transformer = MockTransformer::new(28, 31);

    let mut opts = fx.options();
    opts.preserve_booleans = true;
    opts.kernel_release = Some("6.1.0-13-amd64".to_owned());

    load_policy(&fx.kernel, Some(&transformer), &opts).expect("load succeeds");

    assert!(transformer.applied_booleans.borrow().is_none());
}

#[test]
fn preservation_survives_version_retry() {
    // The snapshot applied is the live kernel state, independent of which
    // version the negotiation finally selects.
    let fx = Fixture::new(30);
    fx.write_policy(31, b"newest");
    fx.write_policy(29, b"older");
    fx.set_boolean("secure_mode", true);

    let mut transformer = MockTransformer::new(28, 31);
    transformer.refuse_downgrade_of = vec![31];

    let mut opts = fx.options();
    opts.preserve_booleans = true;

    let loaded =
        load_policy(&fx.kernel, Some(&transformer), &opts).expect("load succeeds");

    assert_eq!(loaded.version, 29);
    let applied = transformer
        .applied_booleans
        .borrow()
        .clone()
        .expect("snapshot applied");
    assert_eq!(applied, vec![BooleanState {
        name: "secure_mode".to_owned(),
        active: true,
    }]);
}

#[test]
fn unconfigured_kernel_fails_before_any_search() {
    let kernel = Kernel::unconfigured();
    let dir = tempfile::tempdir().expect("tempdir");
    let opts = LoadOptions {
        base_path: dir.path().join("policy"),
        set_local_defs: false,
        preserve_booleans: false,
        users_dir: dir.path().join("users"),
        booleans_path: dir.path().join("booleans.conf"),
        kernel_release: None,
    };

    let error = load_policy(&kernel, None, &opts).expect_err("not configured");
    assert!(matches!(
        error,
        LoadError::Kernel(KernelError::NotConfigured)
    ));
}

#[test]
fn commit_write_reaches_load_interface() {
    let fx = Fixture::new(30);
    let image = PolicyImage::transformed(policy_bytes(30, b"direct"));
    fx.kernel.load_policy(&image).expect("commit");
    assert_eq!(fx.committed(), policy_bytes(30, b"direct"));
}
