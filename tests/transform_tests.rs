//! End-to-end rewriter scenarios over canonical text: one per pass, plus the
//! line-preservation, idempotence, dedup and nesting properties.

mod common;

use common::{normalize_whitespace, write_file, StubEvaluator};
use ljp::errors::LjpError;
use ljp::preprocess::SENTINEL_ALIASES;
use ljp::transform::Transformer;
use ljp::SnippetEvaluator;

fn transform_with(source: &str, evaluator: &dyn SnippetEvaluator) -> String {
    let mut transformer = Transformer::new("test.lua".to_string(), source, evaluator)
        .expect("transformer construction");
    transformer.run().expect("transformation");
    transformer.into_output()
}

fn transform(source: &str) -> String {
    transform_with(source, &StubEvaluator::new())
}

fn transform_err(source: &str) -> LjpError {
    let stub = StubEvaluator::new();
    let mut transformer =
        Transformer::new("test.lua".to_string(), source, &stub).expect("transformer construction");
    transformer.run().expect_err("transformation should fail")
}

/// Line preservation plus idempotence: re-running the pipeline on its own
/// output must be a no-op.
fn check_properties(input: &str, output: &str, evaluator: &dyn SnippetEvaluator) {
    assert_eq!(
        input.lines().count(),
        output.lines().count(),
        "line count must be preserved"
    );
    assert_eq!(
        transform_with(output, evaluator),
        output,
        "pipeline must be idempotent on its own output"
    );
}

fn lines(output: &str) -> Vec<&str> {
    output.lines().collect()
}

// ============================================================================
// FOREACH
// ============================================================================

#[test]
fn foreach_one_line() {
    let input = "--[[luajit-pro]]\nT.foreach{ x => print(x) }\n";
    let output = transform(input);
    assert_eq!(lines(&output)[0], SENTINEL_ALIASES);
    assert_eq!(lines(&output)[1], "for _, x in ipairs(T) do print(x) end");
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn foreach_simple_function_reference() {
    let input = "--[[luajit-pro]]\nT.foreach{ F }\n";
    let output = transform(input);
    assert_eq!(lines(&output)[1], "for _, ref in ipairs(T) do F(ref)  end");
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn zip_with_index_foreach() {
    let input = "--[[luajit-pro]]\nT.zipWithIndex.foreach{ (i, x) => use(i,x) }\n";
    let output = transform(input);
    assert_eq!(lines(&output)[1], "for i, x in ipairs(T) do use(i,x) end");
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn foreach_multi_line_uses_line_keepers_and_padding() {
    let input = "--[[luajit-pro]]\nT\n  .foreach{ x =>\n    h(x)\n  }\n";
    let output = transform(input);
    let out = lines(&output);
    assert_eq!(out[1], "for _, x in ipairs(T) do ");
    assert_eq!(out[2], "--[[line keeper]]");
    assert_eq!(out[3], "    h(x)");
    assert_eq!(out[4], "  end");
    check_properties(input, &output, &StubEvaluator::new());
}

// ============================================================================
// MAP
// ============================================================================

#[test]
fn map_with_return_single_line() {
    let input = "--[[luajit-pro]]\nR = T.map{ x => return x*2 }\n";
    let output = transform(input);
    assert_eq!(
        lines(&output)[1],
        "R = {}; for _, x in ipairs(T) do _tinsert(R, x*2 ) end"
    );
    assert_eq!(
        normalize_whitespace(lines(&output)[1]),
        normalize_whitespace("R = {}; for _, x in ipairs(T) do  _tinsert(R, x*2 ) end")
    );
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn map_simple_function_reference() {
    let input = "--[[luajit-pro]]\nR = T.map{ F }\n";
    let output = transform(input);
    assert_eq!(
        lines(&output)[1],
        "R = {}; for _, ref in ipairs(T) do _tinsert(R, F(ref)  ) end"
    );
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn map_zip_with_index() {
    let input = "--[[luajit-pro]]\nR = T.map.zipWithIndex{ (x, i) => return x + i }\n";
    let output = transform(input);
    assert_eq!(
        lines(&output)[1],
        "R = {}; for i, x in ipairs(T) do _tinsert(R, x + i ) end"
    );
    check_properties(input, &output, &StubEvaluator::new());
}

// ============================================================================
// FILTER
// ============================================================================

#[test]
fn filter_simple_function_reference() {
    let input = "--[[luajit-pro]]\nR = T.filter{ isEven }\n";
    let output = transform(input);
    assert_eq!(
        lines(&output)[1],
        "R = {}; for _, ref in ipairs(T) do if isEven(ref) then _tinsert(R, ref ) end end"
    );
    assert_eq!(
        normalize_whitespace(lines(&output)[1]),
        normalize_whitespace(
            "R = {}; for _, ref in ipairs(T) do if isEven(ref) then _tinsert(R, ref) end end"
        )
    );
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn filter_with_predicate_return() {
    let input = "--[[luajit-pro]]\nR = T.filter{ v => return v > 2 }\n";
    let output = transform(input);
    assert_eq!(
        lines(&output)[1],
        "R = {}; for _, v in ipairs(T) do if v > 2  then _tinsert(R, v) end end"
    );
    check_properties(input, &output, &StubEvaluator::new());
}

// ============================================================================
// NESTING AND DEDUP
// ============================================================================

#[test]
fn foreach_recurses_into_inner_map() {
    let input = format!(
        "{}\n",
        [
            "--[[luajit-pro]]",
            "T.foreach{ x =>",
            "  R = S.map{ y =>",
            "    return y + x",
            "  }",
            "}",
        ]
        .join("\n")
    );
    let output = transform(&input);
    let out = lines(&output);
    assert_eq!(out[1], "for _, x in ipairs(T) do ");
    assert_eq!(out[2], "  R = {}; for _, y in ipairs(S) do ");
    assert_eq!(out[3], "    _tinsert(R, y + x");
    assert_eq!(out[4], "  ) end");
    assert_eq!(out[5], "end");
    check_properties(&input, &output, &StubEvaluator::new());
}

#[test]
fn map_inside_map_rewrites_inner_first() {
    let input = format!(
        "{}\n",
        [
            "--[[luajit-pro]]",
            "R = T.map{ x =>",
            "  S = U.map{ y =>",
            "    return y * y",
            "  }",
            "  return S",
            "}",
        ]
        .join("\n")
    );
    let output = transform(&input);
    let out = lines(&output);
    assert_eq!(out[1], "R = {}; for _, x in ipairs(T) do ");
    assert_eq!(out[2], "  S = {}; for _, y in ipairs(U) do ");
    assert_eq!(out[3], "    _tinsert(S, y * y");
    assert_eq!(out[4], "  ) end");
    assert_eq!(out[5], "  _tinsert(R, S");
    assert_eq!(out[6], ") end");
    check_properties(&input, &output, &StubEvaluator::new());
}

#[test]
fn foreach_inside_map_is_rewritten_by_the_dispatcher() {
    let input = format!(
        "{}\n",
        [
            "--[[luajit-pro]]",
            "R = T.map{ x =>",
            "  acc = 0",
            "  S.foreach{ y =>",
            "    acc = acc + y",
            "  }",
            "  return acc",
            "}",
        ]
        .join("\n")
    );
    let output = transform(&input);
    let out = lines(&output);
    assert_eq!(out[1], "R = {}; for _, x in ipairs(T) do ");
    assert_eq!(out[2], "  acc = 0");
    assert_eq!(out[3], "for _, y in ipairs(S) do ");
    assert_eq!(out[4], "    acc = acc + y");
    assert_eq!(out[5], "  end");
    assert_eq!(out[6], "  _tinsert(R, acc");
    assert_eq!(out[7], ") end");
    check_properties(&input, &output, &StubEvaluator::new());
}

#[test]
fn sibling_constructs_are_each_rewritten_exactly_once() {
    let input = format!(
        "{}\n",
        [
            "--[[luajit-pro]]",
            "A.foreach{ x =>",
            "  f(x)",
            "}",
            "B.foreach{ y =>",
            "  g(y)",
            "}",
        ]
        .join("\n")
    );
    let output = transform(&input);
    let out = lines(&output);
    assert_eq!(out[1], "for _, x in ipairs(A) do ");
    assert_eq!(out[2], "  f(x)");
    assert_eq!(out[3], "end");
    assert_eq!(out[4], "for _, y in ipairs(B) do ");
    assert_eq!(out[5], "  g(y)");
    assert_eq!(out[6], "end");
    check_properties(&input, &output, &StubEvaluator::new());
}

// ============================================================================
// COMP_TIME
// ============================================================================

#[test]
fn comp_time_splices_generated_code() {
    let input = "--[[luajit-pro]]\n$comp_time(hello){ return \"print('hi')\" }\n";
    let output = transform(input);
    let line = lines(&output)[1].to_string();
    assert!(line.starts_with("--[[comp_time]]"), "line was: {line}");
    assert_eq!(line, "--[[comp_time]] print('hi')");
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn comp_time_multi_line_keeps_line_count() {
    let input = format!(
        "{}\n",
        [
            "--[[luajit-pro]]",
            "$comp_time(gen){",
            "  return \"local g = 1\"",
            "}",
        ]
        .join("\n")
    );
    let output = transform(&input);
    let out = lines(&output);
    assert_eq!(out[1], "--[[comp_time]] local g = 1");
    assert_eq!(out[2], "--[[line keeper]] ");
    assert_eq!(out[3], "--[[line keeper]] ");
    check_properties(&input, &output, &StubEvaluator::new());
}

#[test]
fn comp_time_without_name_uses_unknown_tag() {
    struct TagProbe;
    impl SnippetEvaluator for TagProbe {
        fn eval_snippet(&self, tag: &str, _source: &str) -> Result<String, String> {
            assert!(tag.contains("/compTime/Unknown:2"), "tag was: {tag}");
            Ok(String::new())
        }
    }
    let input = "--[[luajit-pro]]\n$comp_time{ return \"x\" }\n";
    let output = transform_with(input, &TagProbe);
    assert!(lines(&output)[1].starts_with("--[[comp_time]]"));
}

// ============================================================================
// INCLUDE
// ============================================================================

#[test]
fn include_inlines_comment_stripped_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "M.lua", "-- a comment\nlocal x = 1\n");
    let stub = StubEvaluator::with_search_root(dir.path());

    let input = "--[[luajit-pro]]\n$include(\"M\")\n";
    let output = transform_with(input, &stub);
    assert_eq!(lines(&output)[1], " local x = 1 ");
    assert_eq!(normalize_whitespace(lines(&output)[1]), "local x = 1");
    check_properties(input, &output, &stub);
}

#[test]
fn include_of_missing_file_becomes_error_comment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = StubEvaluator::with_search_root(dir.path());

    let input = "--[[luajit-pro]]\n$include(\"absent\")\n";
    let output = transform_with(input, &stub);
    assert_eq!(lines(&output)[1], "--[[include file error or empty]]");
    check_properties(input, &output, &stub);
}

#[test]
fn include_of_empty_file_becomes_error_comment() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(dir.path(), "void.lua", "");
    let stub = StubEvaluator::with_search_root(dir.path());

    let input = "--[[luajit-pro]]\n$include(\"void\")\n";
    let output = transform_with(input, &stub);
    assert_eq!(lines(&output)[1], "--[[include file error or empty]]");
}

// ============================================================================
// BOUNDARIES AND FAILURES
// ============================================================================

#[test]
fn sentinel_only_file_becomes_alias_header() {
    let input = "--[[luajit-pro]]\n";
    let output = transform(input);
    assert_eq!(output, format!("{SENTINEL_ALIASES}\n"));
    check_properties(input, &output, &StubEvaluator::new());
}

#[test]
fn unmatched_brace_is_fatal_with_location() {
    let err = transform_err("--[[luajit-pro]]\nT.foreach{ x => f(x)\n");
    match err {
        LjpError::UnmatchedBrace { line, column } => {
            assert_eq!((line, column), (2, 9));
        }
        other => panic!("expected UnmatchedBrace, got {other:?}"),
    }
}

#[test]
fn map_without_return_is_fatal() {
    let err = transform_err("--[[luajit-pro]]\nR = T.map{ x => x*2 }\n");
    assert!(matches!(err, LjpError::MissingReturn { construct: "map", .. }));
}

#[test]
fn filter_without_return_is_fatal() {
    let err = transform_err("--[[luajit-pro]]\nR = T.filter{ v => v > 2 }\n");
    assert!(matches!(
        err,
        LjpError::MissingReturn {
            construct: "filter",
            ..
        }
    ));
}

#[test]
fn non_identifier_receiver_is_fatal() {
    let err = transform_err("--[[luajit-pro]]\nfoo().foreach{ x => f(x) }\n");
    assert!(matches!(err, LjpError::UnexpectedToken { .. }));
}

#[test]
fn comp_time_name_must_be_a_single_identifier() {
    let err = transform_err("--[[luajit-pro]]\n$comp_time(1){ return \"x\" }\n");
    assert!(matches!(err, LjpError::UnexpectedToken { .. }));
}

#[test]
fn comp_time_evaluation_failure_is_fatal() {
    let err = transform_err("--[[luajit-pro]]\n$comp_time{ os.exit() }\n");
    match err {
        LjpError::CompTimeEvalFailed { tag, snippet, .. } => {
            assert!(tag.contains("test.lua/compTime/"));
            assert!(snippet.contains("os.exit()"));
        }
        other => panic!("expected CompTimeEvalFailed, got {other:?}"),
    }
}
