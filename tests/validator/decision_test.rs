//! Decision properties over randomized policies and engine reports.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;

use viewguard::disclosure::{transform, NoAnswerMatcher, ADVISORY_SUFFIX, NO_ANSWER_MESSAGE};
use viewguard::engine::{EngineError, EngineResponse};
use viewguard::policy::{DisclaimMode, PolicyRegistry, ResourceView};
use viewguard::validator::{evaluate, Outcome, VerdictReason};

const VIEWS: &[&str] = &["V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8", "V9"];
const NO_ANSWERS: &[&str] = &[
    "Sorry, I couldn't find an answer.",
    "I could not find any information about that.",
    "No results found.",
    "I'm unable to answer that with the available data.",
];
const SUBSTANTIVE: &[&str] = &[
    "V3 states that the maximum dose is 40mg.",
    "There are 17 reported adverse events.",
    "The label lists hepatotoxicity as a boxed warning.",
];

fn response(answer: &str, tables: Vec<String>) -> EngineResponse {
    EngineResponse {
        answer_text: answer.to_owned(),
        resources_used: tables,
        structured_query: None,
        execution_time: None,
        total_tokens: None,
        confidence: None,
    }
}

fn random_policy(rng: &mut impl Rng) -> PolicyRegistry {
    let count = rng.gen_range(1..=VIEWS.len());
    let allowed: Vec<String> = VIEWS
        .choose_multiple(rng, count)
        .map(|v| format!("labeliq.{v}"))
        .collect();
    let mut roles = BTreeMap::new();
    roles.insert("role".to_owned(), allowed);
    PolicyRegistry::new(&roles, None).expect("valid policy")
}

#[test]
fn missing_provenance_with_real_answer_is_always_denied() {
    let mut rng = rand::thread_rng();
    let matcher = NoAnswerMatcher::default();
    for _ in 0..200 {
        let registry = random_policy(&mut rng);
        let grant = registry.grant("role");
        let answer = SUBSTANTIVE.choose(&mut rng).copied().unwrap_or_default();
        for mode in [DisclaimMode::Disclose, DisclaimMode::Deny] {
            let verdict = evaluate(&grant, Ok(&response(answer, vec![])), &matcher, mode);
            assert_eq!(verdict.outcome, Outcome::Deny);
            assert_eq!(verdict.reason, VerdictReason::MissingProvenance);
            assert!(transform(&verdict, answer).is_none());
        }
    }
}

#[test]
fn genuine_no_answer_is_always_allowed_and_rewritten() {
    let mut rng = rand::thread_rng();
    let matcher = NoAnswerMatcher::default();
    for _ in 0..200 {
        let registry = random_policy(&mut rng);
        let grant = registry.grant("role");
        let answer = NO_ANSWERS.choose(&mut rng).copied().unwrap_or_default();
        let verdict = evaluate(
            &grant,
            Ok(&response(answer, vec![])),
            &matcher,
            DisclaimMode::Disclose,
        );
        assert_eq!(verdict.outcome, Outcome::Allow);
        assert!(verdict.resources_used.is_empty());
        assert_eq!(transform(&verdict, answer).as_deref(), Some(NO_ANSWER_MESSAGE));
    }
}

#[test]
fn allow_iff_usage_is_subset_of_grant() {
    let mut rng = rand::thread_rng();
    let matcher = NoAnswerMatcher::default();
    for _ in 0..500 {
        let registry = random_policy(&mut rng);
        let grant = registry.grant("role");

        let count = rng.gen_range(1..=4);
        let used: Vec<String> = VIEWS
            .choose_multiple(&mut rng, count)
            .map(|v| {
                if rng.gen_bool(0.5) {
                    format!("other_db.{v}")
                } else {
                    (*v).to_owned()
                }
            })
            .collect();
        let subset = used
            .iter()
            .all(|raw| grant.permits(&ResourceView::parse(raw)));

        let answer = "Here is what the data shows.";
        let verdict = evaluate(
            &grant,
            Ok(&response(answer, used.clone())),
            &matcher,
            DisclaimMode::Disclose,
        );
        let message = transform(&verdict, answer).expect("allow and disclaim carry a message");

        if subset {
            assert_eq!(verdict.outcome, Outcome::Allow, "used {used:?}");
            assert!(verdict.unauthorized.is_empty());
            assert_eq!(message, answer);
        } else {
            assert_eq!(verdict.outcome, Outcome::Disclaim, "used {used:?}");
            assert!(!verdict.unauthorized.is_empty());
            assert!(message.ends_with(ADVISORY_SUFFIX));
        }
    }
}

#[test]
fn no_answer_text_with_reported_usage_is_still_checked() {
    let mut roles = BTreeMap::new();
    roles.insert("patient".to_owned(), vec!["V1".to_owned()]);
    let registry = PolicyRegistry::new(&roles, None).expect("valid policy");
    let verdict = evaluate(
        &registry.grant("patient"),
        Ok(&response("Sorry, I couldn't find an answer.", vec!["V9".to_owned()])),
        &NoAnswerMatcher::default(),
        DisclaimMode::Disclose,
    );
    assert_eq!(verdict.outcome, Outcome::Disclaim);
}

#[test]
fn every_engine_error_is_error_outcome() {
    let mut roles = BTreeMap::new();
    roles.insert("patient".to_owned(), vec!["V1".to_owned()]);
    let registry = PolicyRegistry::new(&roles, None).expect("valid policy");
    let errors = [
        EngineError::Timeout,
        EngineError::Parse("bad".to_owned()),
        EngineError::HttpStatus {
            status: 500,
            body: String::new(),
        },
    ];
    for err in &errors {
        let verdict = evaluate(
            &registry.grant("patient"),
            Err(err),
            &NoAnswerMatcher::default(),
            DisclaimMode::Disclose,
        );
        assert_eq!(verdict.outcome, Outcome::Error);
        assert!(transform(&verdict, "anything").is_none());
    }
}

#[test]
fn identifier_with_empty_suffix_is_never_silently_dropped() {
    let mut roles = BTreeMap::new();
    roles.insert("patient".to_owned(), vec!["V1".to_owned()]);
    let registry = PolicyRegistry::new(&roles, None).expect("valid policy");
    let report = response(
        "V1 and restricted data say",
        vec!["V1".to_owned(), "restricted.".to_owned()],
    );

    let disclosed = evaluate(
        &registry.grant("patient"),
        Ok(&report),
        &NoAnswerMatcher::default(),
        DisclaimMode::Disclose,
    );
    assert_eq!(disclosed.outcome, Outcome::Disclaim);
    assert_eq!(disclosed.unauthorized, vec![ResourceView::parse("restricted.")]);

    let strict = evaluate(
        &registry.grant("patient"),
        Ok(&report),
        &NoAnswerMatcher::default(),
        DisclaimMode::Deny,
    );
    assert_eq!(strict.outcome, Outcome::Deny);
    assert_eq!(strict.reason, VerdictReason::Unauthorized);
}
