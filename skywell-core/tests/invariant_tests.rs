//! Invariant Tests
//!
//! Properties that must hold for any input: score range, determinism,
//! weight-zero neutrality, inclusive thresholds, "no data" propagation and
//! single-flight caching.

use chrono::{DateTime, Duration, TimeZone, Utc};
use skywell_core::scoring::{finalize_score, rated_score};
use skywell_core::{
    AlertClassifier, CacheKey, CellIndex, Extent, ForecastCache, GridDataset, GridGeometry,
    GridHarmonizer, HarmonizedGridSet, ManualClock, ProfilePreset, ProfileSpec, ResolvedConfig,
    RiskEngine, RiskScorer, UserProfile, Variable,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, 0, 0).unwrap()
}

fn extent() -> Extent {
    Extent::new(53.0, 52.3, 14.0, 13.0).unwrap()
}

fn axis() -> Vec<DateTime<Utc>> {
    (0..3).map(|i| at(i * 6)).collect()
}

/// Target identical to the source geometry, so resampling is the identity
fn target() -> GridGeometry {
    GridGeometry::new(extent(), 0.1, axis()).unwrap()
}

fn varied_uv(c: CellIndex) -> Option<f64> {
    let k = c.lat * 7 + c.lon * 13 + c.time * 3;
    if k % 11 == 0 {
        None
    } else {
        Some((k % 23) as f64 * 0.7)
    }
}

fn varied_pollen(c: CellIndex) -> Option<f64> {
    let k = c.lat * 5 + c.lon * 3 + c.time * 17;
    if k % 9 == 0 {
        None
    } else {
        Some((k % 31) as f64 * 10.0)
    }
}

fn sources() -> Vec<GridDataset> {
    vec![
        GridDataset::from_fn(Variable::UvIndex, extent(), 0.1, axis(), varied_uv).unwrap(),
        GridDataset::from_fn(Variable::GrassPollen, extent(), 0.1, axis(), varied_pollen).unwrap(),
        GridDataset::from_fn(Variable::BirchPollen, extent(), 0.1, axis(), |c| {
            varied_pollen(c).map(|v| v / 2.0)
        })
        .unwrap(),
    ]
}

fn harmonized() -> HarmonizedGridSet {
    GridHarmonizer::default().harmonize(&sources(), &target()).unwrap()
}

fn profile(weights: &[(Variable, f64)], threshold: f64) -> UserProfile {
    UserProfile::new(ProfileSpec {
        id: "invariant".to_string(),
        weights: weights.iter().copied().collect(),
        max_overrides: BTreeMap::new(),
        alert_threshold: threshold,
        location: None,
    })
    .unwrap()
}

fn all_profiles() -> Vec<UserProfile> {
    let mut profiles: Vec<UserProfile> = ProfilePreset::ALL
        .iter()
        .map(|p| p.build(p.as_str()).unwrap())
        .collect();
    let mut overridden = ProfileSpec {
        id: "override".to_string(),
        weights: [(Variable::UvIndex, 1.5), (Variable::GrassPollen, 0.5)]
            .into_iter()
            .collect(),
        max_overrides: BTreeMap::new(),
        alert_threshold: 3.0,
        location: None,
    };
    overridden.max_overrides.insert(Variable::UvIndex, 16.0);
    profiles.push(UserProfile::new(overridden).unwrap());
    profiles
}

#[test]
fn test_scores_and_ratings_stay_in_range() {
    let grid = harmonized();
    let scorer = RiskScorer::default();
    for profile in all_profiles() {
        let scores = scorer.score(&grid, &profile);
        for value in scores.values().iter().flatten() {
            assert!(
                (1.0..=10.0).contains(value),
                "{} out of range for {}",
                value,
                profile.id()
            );
            let rated = rated_score(*value);
            assert!((1.0..=10.0).contains(&rated));
            assert!((rated - value).abs() <= 0.05 + 1e-9);
        }
    }
}

#[test]
fn test_identical_input_gives_identical_output() {
    let config = ResolvedConfig::defaults().unwrap();
    let first = RiskEngine::new(&config)
        .run_cycle(&sources(), &target(), &all_profiles())
        .unwrap();
    let second = RiskEngine::new(&config)
        .run_cycle(&sources(), &target(), &all_profiles())
        .unwrap();

    assert_eq!(first.grid, second.grid);
    for (a, b) in first.assessments.iter().zip(&second.assessments) {
        assert_eq!(a.scores, b.scores);
        let a_json = serde_json::to_string(&a.report).expect("serialize report");
        let b_json = serde_json::to_string(&b.report).expect("serialize report");
        assert_eq!(a_json, b_json);
    }
}

#[test]
fn test_zero_weight_variables_do_not_change_scores() {
    let grid = harmonized();
    let scorer = RiskScorer::default();
    let uv_only = scorer.score(&grid, &profile(&[(Variable::UvIndex, 2.0)], 5.0));
    let with_zeros = scorer.score(
        &grid,
        &profile(
            &[
                (Variable::UvIndex, 2.0),
                (Variable::GrassPollen, 0.0),
                (Variable::TotalPollen, 0.0),
            ],
            5.0,
        ),
    );
    assert_eq!(uv_only.values(), with_zeros.values());

    let uv = grid.layer(Variable::UvIndex).unwrap();
    for (score, raw) in with_zeros.values().iter().zip(uv.values()) {
        assert_eq!(*score, raw.map(|x| finalize_score(x / 11.0 * 10.0)));
    }
}

#[test]
fn test_threshold_is_inclusive() {
    let uv = GridDataset::from_fn(Variable::UvIndex, extent(), 0.1, axis(), |_| Some(5.5)).unwrap();
    let grid = GridHarmonizer::default().harmonize(&[uv], &target()).unwrap();
    let scorer = RiskScorer::default();
    let classifier = AlertClassifier::default();

    let at_threshold = profile(&[(Variable::UvIndex, 1.0)], 5.0);
    let scores = scorer.score(&grid, &at_threshold);
    assert!(scores.values().iter().all(|v| *v == Some(5.0)));
    let report = classifier.classify(&scores, &at_threshold);
    assert_eq!(report.alerts.len(), scores.len());

    let above = profile(&[(Variable::UvIndex, 1.0)], 5.1);
    let report = classifier.classify(&scorer.score(&grid, &above), &above);
    assert!(report.alerts.is_empty());
    assert_eq!(report.coverage.below_threshold, scores.len());
    assert_eq!(report.coverage.highest_below_threshold, Some(5.0));
}

#[test]
fn test_no_data_propagates_only_when_every_weighted_variable_is_missing() {
    let grid = harmonized();
    let scorer = RiskScorer::default();
    let uv_only = scorer.score(&grid, &profile(&[(Variable::UvIndex, 1.0)], 5.0));
    let mixed = scorer.score(
        &grid,
        &profile(&[(Variable::UvIndex, 1.0), (Variable::GrassPollen, 1.0)], 5.0),
    );

    let uv = grid.layer(Variable::UvIndex).unwrap().values();
    let grass = grid.layer(Variable::GrassPollen).unwrap().values();
    let mut checked_partial = false;
    for i in 0..uv.len() {
        assert_eq!(uv_only.values()[i].is_none(), uv[i].is_none());
        assert_eq!(
            mixed.values()[i].is_none(),
            uv[i].is_none() && grass[i].is_none()
        );
        if let (None, Some(g)) = (uv[i], grass[i]) {
            assert_eq!(mixed.values()[i], Some(finalize_score(g / 100.0 * 10.0)));
            checked_partial = true;
        }
    }
    assert!(checked_partial);
}

#[test]
fn test_cache_computes_once_for_concurrent_callers() {
    let cache: ForecastCache<&'static str, u32> = ForecastCache::new(Duration::days(4));
    let calls = AtomicUsize::new(0);
    let barrier = Barrier::new(8);

    let results: Vec<u32> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    cache
                        .get_or_compute("berlin", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok::<_, ()>(42)
                        })
                        .expect("compute")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("join")).collect()
    });

    assert_eq!(results, vec![42; 8]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cache_unrelated_keys_compute_concurrently() {
    let cache: ForecastCache<&'static str, u32> = ForecastCache::new(Duration::days(4));
    let a_computing = Barrier::new(2);
    let (b_done, b_seen) = mpsc::channel::<()>();

    let (a, b) = std::thread::scope(|s| {
        let cache = &cache;
        let a_computing = &a_computing;
        let a = s.spawn(move || {
            cache.get_or_compute("a", || {
                a_computing.wait();
                // Only completes if "b" was computed while "a" is in flight
                b_seen
                    .recv_timeout(std::time::Duration::from_secs(5))
                    .map(|_| 1)
            })
        });
        a_computing.wait();
        let b = cache.get_or_compute("b", || Ok::<_, ()>(2));
        b_done.send(()).expect("send");
        (a.join().expect("join"), b)
    });

    assert_eq!(a, Ok(1));
    assert_eq!(b, Ok(2));
}

#[test]
fn test_cache_entry_expires_after_horizon() {
    let clock = Arc::new(ManualClock::new(at(0)));
    let cache: ForecastCache<&'static str, u32> =
        ForecastCache::with_clock(Duration::days(4), clock.clone());
    assert_eq!(cache.get_or_compute("k", || Ok::<_, ()>(1)), Ok(1));
    clock.advance(Duration::days(3));
    assert_eq!(cache.get_or_compute("k", || Ok::<_, ()>(2)), Ok(1));
    clock.advance(Duration::days(1));
    assert_eq!(cache.get_or_compute("k", || Ok::<_, ()>(3)), Ok(3));
}

#[test]
fn test_cache_key_distinguishes_profile_changes() {
    let target = target();
    let base = CacheKey::for_target(&target, [Variable::UvIndex, Variable::GrassPollen]);
    let reordered = CacheKey::for_target(&target, [Variable::GrassPollen, Variable::UvIndex]);
    assert_eq!(base, reordered);

    let a = profile(&[(Variable::UvIndex, 4.0)], 5.0);
    let b = profile(&[(Variable::UvIndex, 4.5)], 5.0);
    let c = profile(&[(Variable::UvIndex, 4.0)], 6.0);
    assert_ne!(base.clone().with_profile(&a), base.clone().with_profile(&b));
    assert_ne!(base.clone().with_profile(&a), base.clone().with_profile(&c));
    assert_eq!(base.clone().with_profile(&a), base.with_profile(&a.clone()));
}

#[test]
fn test_engine_recomputes_after_profile_change() {
    let engine = RiskEngine::new(&ResolvedConfig::defaults().unwrap());
    let grid = engine.harmonize(&sources(), &target()).unwrap();
    let before = engine.assess(&grid, &profile(&[(Variable::UvIndex, 1.0)], 5.0));
    let after = engine.assess(
        &grid,
        &profile(&[(Variable::UvIndex, 1.0), (Variable::GrassPollen, 1.0)], 5.0),
    );
    assert!(!Arc::ptr_eq(&before, &after));
    assert_ne!(before.scores.values(), after.scores.values());
}
