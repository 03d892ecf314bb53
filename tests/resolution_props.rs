//! Property-based tests for argument and environment resolution
//!
//! Tests invariants:
//! - Identical config and options always yield identical argument vectors
//! - Numeric flags appear in a fixed order whether defaulted or overridden
//! - Per-call options win field by field; unset fields never shadow config
//! - Environment layers: per-call > session > UTF-8 overlay > inherited

use std::collections::HashMap;

use autocoder_rag_rs::{build_run_args, resolve_env, ProductMode, QueryOptions, RagConfig};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_config() -> impl Strategy<Value = RagConfig> {
    (
        any::<u32>(),
        0.0f64..1.0,
        0.0f64..1.0,
        -10i32..10,
        any::<bool>(),
        any::<bool>(),
        proptest::option::of("[a-z0-9_]{1,12}"),
        (any::<bool>(), any::<bool>(), any::<bool>()),
    )
        .prop_map(
            |(limit, full, segment, relevance, agentic, pro, model, (hybrid, window, reorder))| {
                let mut config = RagConfig::new("/docs")
                    .rag_context_window_limit(limit)
                    .full_text_ratio(full)
                    .segment_ratio(segment)
                    .rag_doc_filter_relevance(relevance)
                    .agentic(agentic)
                    .product_mode(if pro { ProductMode::Pro } else { ProductMode::Lite })
                    .enable_hybrid_index(hybrid)
                    .disable_auto_window(window)
                    .disable_segment_reorder(reorder);
                config.model = model;
                config
            },
        )
}

fn arb_options() -> impl Strategy<Value = QueryOptions> {
    (
        proptest::option::of("[a-z0-9_]{1,12}"),
        proptest::option::of(any::<bool>()),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(model, agentic, pro)| QueryOptions {
            model,
            agentic,
            product_mode: pro.map(|p| if p { ProductMode::Pro } else { ProductMode::Lite }),
            ..QueryOptions::default()
        })
}

fn strings(config: &RagConfig, options: Option<&QueryOptions>) -> Vec<String> {
    build_run_args(config, options)
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

fn value_after(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .map(|i| args[i + 1].clone())
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_args_are_deterministic(config in arb_config(), options in arb_options()) {
        prop_assert_eq!(strings(&config, Some(&options)), strings(&config, Some(&options)));
        prop_assert_eq!(strings(&config, None), strings(&config, None));
    }

    #[test]
    fn prop_numeric_flags_fixed_order(config in arb_config(), options in arb_options()) {
        let args = strings(&config, Some(&options));
        let positions: Vec<usize> = [
            "--rag_context_window_limit",
            "--full_text_ratio",
            "--segment_ratio",
            "--rag_doc_filter_relevance",
        ]
        .iter()
        .map(|flag| args.iter().position(|a| a == flag).expect("numeric flag always present"))
        .collect();

        prop_assert!(positions.windows(2).all(|w| w[1] == w[0] + 2));
        prop_assert_eq!(
            value_after(&args, "--rag_context_window_limit"),
            Some(config.rag_context_window_limit.to_string())
        );
        let ratio: f64 = value_after(&args, "--full_text_ratio").unwrap().parse().unwrap();
        prop_assert_eq!(ratio, config.full_text_ratio);
    }

    #[test]
    fn prop_options_override_field_by_field(config in arb_config(), options in arb_options()) {
        let args = strings(&config, Some(&options));

        let model = options.model.clone().or_else(|| config.model.clone());
        prop_assert_eq!(value_after(&args, "--model"), model);

        let agentic = options.agentic.unwrap_or(config.agentic);
        prop_assert_eq!(args.contains(&"--agentic".to_string()), agentic);

        let mode = options.product_mode.unwrap_or(config.product_mode);
        prop_assert!(args.contains(&mode.as_flag().to_string()));
    }

    #[test]
    fn prop_empty_options_equal_no_options(config in arb_config()) {
        prop_assert_eq!(strings(&config, Some(&QueryOptions::default())), strings(&config, None));
    }

    #[test]
    fn prop_env_top_layer_wins(
        key in "[A-Z]{1,8}",
        inherited in "[a-z]{1,8}",
        session in proptest::option::of("[a-z]{1,8}"),
        per_call in proptest::option::of("[a-z]{1,8}"),
    ) {
        let session_env: HashMap<String, String> =
            session.iter().map(|v| (key.clone(), v.clone())).collect();
        let call_env: HashMap<String, String> =
            per_call.iter().map(|v| (key.clone(), v.clone())).collect();

        let env = resolve_env(
            vec![(key.clone(), inherited.clone())],
            false,
            &session_env,
            Some(&call_env),
        );

        let expected = per_call.or(session).unwrap_or(inherited);
        prop_assert_eq!(env.get(&key), Some(&expected));
    }
}

#[test]
fn test_utf8_overlay_sits_between_inherited_and_session() {
    let inherited = vec![
        ("LANG".to_string(), "C".to_string()),
        ("LC_ALL".to_string(), "C".to_string()),
        ("PYTHONIOENCODING".to_string(), "ascii".to_string()),
    ];
    let session: HashMap<String, String> = [("LC_ALL".to_string(), "en_US.UTF-8".to_string())].into();
    let per_call: HashMap<String, String> = [("PYTHONIOENCODING".to_string(), "utf-16".to_string())].into();

    let env = resolve_env(inherited, true, &session, Some(&per_call));
    assert_eq!(env["LANG"], "zh_CN.UTF-8");
    assert_eq!(env["LC_ALL"], "en_US.UTF-8");
    assert_eq!(env["PYTHONIOENCODING"], "utf-16");
    assert_eq!(env["CHCP"], "65001");
}
