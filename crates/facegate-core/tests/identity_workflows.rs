use std::cell::Cell;
use std::collections::VecDeque;

use facegate_core::extractor::ExtractorError;
use facegate_core::{
    run_enrollment, run_verification, BoundingBox, DetectedFace, Embedding, EmbeddingExtractor,
    EnrollmentFields, EuclideanMatcher, FaceGateError, IdentityRecord, IdentityRegistry,
    IdentityStore, MatchPolicy, MatchResult, Matcher, StoreFile, DEFAULT_MATCH_THRESHOLD,
};
use image::RgbImage;
use tempfile::TempDir;

/// Hands out queued extractor results, one per call.
#[derive(Default)]
struct ScriptedExtractor {
    replies: VecDeque<Vec<DetectedFace>>,
    calls: usize,
}

impl ScriptedExtractor {
    fn push_face(&mut self, values: Vec<f32>) -> &mut Self {
        self.replies.push_back(vec![face(values)]);
        self
    }

    fn push_faces(&mut self, faces: Vec<DetectedFace>) -> &mut Self {
        self.replies.push_back(faces);
        self
    }
}

impl EmbeddingExtractor for ScriptedExtractor {
    fn detect_and_encode(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        self.calls += 1;
        Ok(self.replies.pop_front().unwrap_or_default())
    }
}

/// Wraps the real matcher and counts invocations.
#[derive(Default)]
struct CountingMatcher {
    inner: EuclideanMatcher,
    calls: Cell<usize>,
}

impl Matcher for CountingMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], threshold: f32) -> MatchResult {
        self.calls.set(self.calls.get() + 1);
        self.inner.compare(probe, gallery, threshold)
    }
}

fn face(values: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bounding_box: BoundingBox { left: 10, top: 10, right: 90, bottom: 90 },
        embedding: Embedding::new(values),
    }
}

fn fields(key: &str, name: &str) -> EnrollmentFields {
    EnrollmentFields {
        identity_key: key.into(),
        display_name: name.into(),
        phone: format!("phone of {name}"),
        address: format!("address of {name}"),
    }
}

fn open(tmp: &TempDir) -> IdentityRegistry {
    IdentityRegistry::open(StoreFile::new(tmp.path().join("identities.fgid"))).unwrap()
}

fn photo() -> RgbImage {
    RgbImage::new(16, 16)
}

#[test]
fn enrolled_set_is_listed_exactly() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let mut extractor = ScriptedExtractor::default();
    let people = [("ada@x.io", "Ada"), ("alan@x.io", "Alan"), ("grace@x.io", "Grace")];

    for (i, (key, name)) in people.iter().enumerate() {
        extractor.push_face(vec![i as f32, 0.5, -0.5]);
        run_enrollment(&mut registry, &mut extractor, &fields(key, name), Some(&photo())).unwrap();
    }

    let listed = registry.store().profiles();
    assert_eq!(listed.len(), people.len());
    for (profile, (key, name)) in listed.iter().zip(people.iter()) {
        assert_eq!(profile.identity_key, *key);
        assert_eq!(profile.display_name, *name);
        assert_eq!(profile.phone, format!("phone of {name}"));
        assert_eq!(profile.address, format!("address of {name}"));
    }
}

#[test]
fn duplicate_enrollment_leaves_store_and_file_unchanged() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let mut extractor = ScriptedExtractor::default();
    extractor.push_face(vec![0.1, 0.2]).push_face(vec![0.3, 0.4]);

    run_enrollment(&mut registry, &mut extractor, &fields("ada@x.io", "Ada"), Some(&photo())).unwrap();
    let store_before = registry.store().clone();
    let file_before = std::fs::read(registry.file().path()).unwrap();

    let err = run_enrollment(&mut registry, &mut extractor, &fields("ada@x.io", "Imposter"), Some(&photo()))
        .unwrap_err();
    assert!(matches!(err, FaceGateError::DuplicateIdentity(ref k) if k == "ada@x.io"));
    assert_eq!(registry.store(), &store_before);
    assert_eq!(std::fs::read(registry.file().path()).unwrap(), file_before);
}

#[test]
fn verify_on_empty_store_never_reaches_matcher_or_extractor() {
    let store = IdentityStore::new();
    let mut extractor = ScriptedExtractor::default();
    let matcher = CountingMatcher::default();

    let err = run_verification(&store, &mut extractor, Some(&photo()), &matcher, DEFAULT_MATCH_THRESHOLD)
        .unwrap_err();
    assert!(matches!(err, FaceGateError::EmptyStore));
    assert_eq!(matcher.calls.get(), 0);
    assert_eq!(extractor.calls, 0);
}

#[test]
fn save_then_load_round_trips() {
    let tmp = TempDir::new().unwrap();
    let file = StoreFile::new(tmp.path().join("identities.fgid"));
    let store = IdentityStore::from_records(vec![
        IdentityRecord {
            identity_key: "ada@x.io".into(),
            display_name: "Ada Lovelace".into(),
            phone: "+44 20 7946 0000".into(),
            address: "12 St James's Square\nLondon".into(),
            embedding: Embedding::new((0..128).map(|i| (i as f32 - 64.0) / 97.0).collect()),
        },
        IdentityRecord {
            identity_key: "grace@x.io".into(),
            display_name: "Grace Hopper".into(),
            phone: String::new(),
            address: String::new(),
            embedding: Embedding::new((0..128).map(|i| (i as f32).sin() * 0.1).collect()),
        },
    ])
    .unwrap();

    file.save(&store).unwrap();
    assert_eq!(file.load().unwrap(), store);
}

#[test]
fn nearest_identity_wins_with_expected_confidence() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let mut extractor = ScriptedExtractor::default();
    // B is enrolled first and sits at 0.5 from the probe, A at 0.3.
    extractor.push_face(vec![0.5, 0.0]).push_face(vec![0.3, 0.0]);
    run_enrollment(&mut registry, &mut extractor, &fields("b@x.io", "B"), Some(&photo())).unwrap();
    run_enrollment(&mut registry, &mut extractor, &fields("a@x.io", "A"), Some(&photo())).unwrap();

    extractor.push_face(vec![0.0, 0.0]);
    let outcome = run_verification(
        registry.store(),
        &mut extractor,
        Some(&photo()),
        &EuclideanMatcher::new(MatchPolicy::Nearest),
        0.6,
    )
    .unwrap();

    assert!(outcome.is_match());
    assert_eq!(outcome.identity.as_ref().unwrap().identity_key, "a@x.io");
    assert!((outcome.result.confidence.unwrap() - 70.0).abs() < 1e-4);
}

#[test]
fn exact_probe_matches_with_full_confidence() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let mut extractor = ScriptedExtractor::default();
    extractor.push_face(vec![0.11, -0.42, 0.93]);
    run_enrollment(&mut registry, &mut extractor, &fields("ada@x.io", "Ada"), Some(&photo())).unwrap();

    extractor.push_face(vec![0.11, -0.42, 0.93]);
    let outcome = run_verification(
        registry.store(),
        &mut extractor,
        Some(&photo()),
        &EuclideanMatcher::default(),
        DEFAULT_MATCH_THRESHOLD,
    )
    .unwrap();
    assert_eq!(outcome.result.confidence, Some(100.0));
    assert_eq!(outcome.identity.unwrap().display_name, "Ada");
}

#[test]
fn face_count_is_enforced_on_enroll_and_verify() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let mut extractor = ScriptedExtractor::default();
    extractor
        .push_faces(vec![])
        .push_faces(vec![face(vec![0.1]), face(vec![0.2])]);

    assert!(matches!(
        run_enrollment(&mut registry, &mut extractor, &fields("ada@x.io", "Ada"), Some(&photo())),
        Err(FaceGateError::NoFaceDetected)
    ));
    assert!(matches!(
        run_enrollment(&mut registry, &mut extractor, &fields("ada@x.io", "Ada"), Some(&photo())),
        Err(FaceGateError::MultipleFaces(2))
    ));
    assert!(registry.store().is_empty());

    extractor.push_face(vec![0.1]);
    run_enrollment(&mut registry, &mut extractor, &fields("ada@x.io", "Ada"), Some(&photo())).unwrap();

    extractor.push_faces(vec![face(vec![0.1]), face(vec![0.1]), face(vec![0.1])]);
    assert!(matches!(
        run_verification(registry.store(), &mut extractor, Some(&photo()), &EuclideanMatcher::default(), 0.6),
        Err(FaceGateError::MultipleFaces(3))
    ));
}

#[test]
fn deleting_unknown_identity_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let mut registry = open(&tmp);
    let mut extractor = ScriptedExtractor::default();
    extractor.push_face(vec![0.5, 0.5]);
    run_enrollment(&mut registry, &mut extractor, &fields("ada@x.io", "Ada"), Some(&photo())).unwrap();
    let before = registry.store().clone();

    assert!(matches!(registry.remove("nobody@x.io"), Err(FaceGateError::NotFound(_))));
    assert_eq!(registry.store(), &before);

    let reopened = open(&tmp);
    assert_eq!(reopened.store(), &before);
}

#[test]
fn corrupt_store_refuses_to_open() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("identities.fgid");
    std::fs::write(&path, b"definitely not an identity store").unwrap();

    match IdentityRegistry::open(StoreFile::new(&path)) {
        Err(err @ FaceGateError::CorruptStore { .. }) => assert!(!err.is_user_correctable()),
        other => panic!("expected CorruptStore, got {other:?}"),
    }
}
