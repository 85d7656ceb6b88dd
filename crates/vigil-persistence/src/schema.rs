//! Esquema Diesel declarado manualmente; el DDL real vive en el catálogo de
//! `migrations`. Nota: `stage_log.run_id` es referencia blanda a propósito
//! (sin FK): los resultados históricos deben seguir legibles aunque el run
//! que los originó se haya podado.

diesel::table! {
    pipeline_runs (run_id) {
        run_id -> Text,
        created_at -> Timestamptz,
        config_snapshot -> Jsonb,
        notes -> Text,
    }
}

diesel::table! {
    stage_log (id) {
        id -> BigInt,
        run_id -> Text,
        stage -> Integer,
        status -> Text,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        error_message -> Nullable<Text>,
        metadata -> Nullable<Jsonb>,
        gate_token -> Nullable<Text>,
    }
}

diesel::table! {
    stage_processing_log (stage, entity_id) {
        stage -> Integer,
        entity_id -> Text,
        input_hash -> Text,
        run_id -> Text,
        processed_at -> Timestamptz,
    }
}

diesel::table! {
    schema_version (id) {
        id -> SmallInt,
        version -> Integer,
    }
}

diesel::table! {
    taxonomy (quality_id) {
        quality_id -> Text,
        run_id -> Text,
        name -> Text,
        definition -> Text,
        recognition_test -> Text,
        exploitation_logic -> Text,
        canonical_examples -> Jsonb,
        review_status -> Text,
        reviewer_notes -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    policies (policy_id) {
        policy_id -> Text,
        run_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        source_document -> Nullable<Text>,
        structural_characterization -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    policy_scores (id) {
        id -> BigInt,
        run_id -> Text,
        policy_id -> Text,
        quality_id -> Text,
        present -> Bool,
        evidence -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    predictions (prediction_id) {
        prediction_id -> Text,
        run_id -> Text,
        policy_id -> Text,
        convergence_score -> Integer,
        mechanics -> Text,
        enabling_qualities -> Jsonb,
        actor_profile -> Nullable<Text>,
        lifecycle_stage -> Nullable<Text>,
        detection_difficulty -> Nullable<Text>,
        review_status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    detection_patterns (pattern_id) {
        pattern_id -> Text,
        run_id -> Text,
        prediction_id -> Text,
        data_source -> Text,
        anomaly_signal -> Text,
        baseline -> Nullable<Text>,
        false_positive_risk -> Nullable<Text>,
        detection_latency -> Nullable<Text>,
        priority -> Text,
        implementation_notes -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    pipeline_runs,
    stage_log,
    stage_processing_log,
    taxonomy,
    policies,
    policy_scores,
    predictions,
    detection_patterns,
);
