//! Tests for batch runs
//!
//! Most tests drive `BatchEngine` with a fake executor that records the
//! merged inputs it receives and answers through a plain function.

#[cfg(test)]
mod tests {
    use crate::{
        batch::{BatchEngine, ERROR_MARKER_KEY, InputDirs, OUTPUT_FILE_NAME, dump_jsonl},
        config::FlowConfig,
        data::{DataLoader, DirectoryLoader},
        error::{BatchError, ExecutionError, MappingError, PersistenceError},
        executor::{CommandExecutor, FlowExecutor},
        mapping::InputsMapping,
        media::{MediaKind, MediaReference},
        BatchResult, LineResult, Record, RunMetadata, Value,
    };
    use base64::{Engine, engine::general_purpose::STANDARD};
    use chrono::Utc;
    use serde_json::json;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Respond = fn(usize, &Record) -> Option<Record>;

    /// Executor double that records every bulk call
    struct FakeExecutor {
        working_dir: PathBuf,
        flow_inputs: Vec<String>,
        respond: Respond,
        calls: Mutex<Vec<Vec<Record>>>,
    }

    impl FakeExecutor {
        fn new(working_dir: &Path, respond: Respond) -> Self {
            Self {
                working_dir: working_dir.to_path_buf(),
                flow_inputs: Vec::new(),
                respond,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<Record>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FlowExecutor for FakeExecutor {
        fn working_dir(&self) -> &Path {
            &self.working_dir
        }

        fn flow_inputs(&self) -> &[String] {
            &self.flow_inputs
        }

        async fn exec_bulk(
            &self,
            inputs: Vec<Record>,
            run_id: Option<String>,
            _output_dir: &Path,
        ) -> Result<BatchResult, ExecutionError> {
            self.calls.lock().unwrap().push(inputs.clone());
            let start_time = Utc::now();
            let line_results: Vec<LineResult> = inputs
                .iter()
                .enumerate()
                .map(|(i, input)| match (self.respond)(i, input) {
                    Some(output) => LineResult::completed(i, output),
                    None => LineResult::failed(i, "flow_error", format!("line {i} exploded")),
                })
                .collect();
            Ok(BatchResult {
                run_id: run_id.unwrap_or_else(|| "fake-run".to_string()),
                outputs: line_results.iter().filter_map(|l| l.output.clone()).collect(),
                metadata: RunMetadata::from_lines(&line_results, start_time, Utc::now()),
                line_results,
            })
        }
    }

    /// Executor whose engine fails as a whole
    struct BrokenExecutor(PathBuf);

    impl FlowExecutor for BrokenExecutor {
        fn working_dir(&self) -> &Path {
            &self.0
        }

        async fn exec_bulk(
            &self,
            _inputs: Vec<Record>,
            _run_id: Option<String>,
            _output_dir: &Path,
        ) -> Result<BatchResult, ExecutionError> {
            Err(ExecutionError::Worker("engine crashed".to_string()))
        }
    }

    fn answer(_line: usize, input: &Record) -> Option<Record> {
        let question = input.get("question").and_then(Value::as_str)?;
        Record::from_json(json!({"answer": format!("A: {question}")}))
    }

    fn fail_second_line(line: usize, input: &Record) -> Option<Record> {
        if line == 1 { None } else { answer(line, input) }
    }

    fn answer_with_image(line: usize, input: &Record) -> Option<Record> {
        let mut output = answer(line, input)?;
        output.insert(
            "image",
            Value::from(json!({"data:image/png;base64": STANDARD.encode(format!("png-{line}"))})),
        );
        Some(output)
    }

    fn write_jsonl(dir: &Path, file: &str, rows: &[serde_json::Value]) {
        fs::create_dir_all(dir).unwrap();
        let content: String = rows.iter().map(|row| format!("{row}\n")).collect();
        fs::write(dir.join(file), content).unwrap();
    }

    /// Workspace with `docs` (field `text`) and `images` (field `pic`) sources
    fn workspace(docs: usize, images: usize) -> TempDir {
        let root = TempDir::new().unwrap();
        let doc_rows: Vec<_> = (0..docs).map(|i| json!({"text": format!("doc {i}")})).collect();
        write_jsonl(&root.path().join("docs"), "docs.jsonl", &doc_rows);

        let images_dir = root.path().join("images");
        let image_rows: Vec<_> = (0..images)
            .map(|i| json!({"pic": {"data:image/png;path": format!("pics/{i}.png")}}))
            .collect();
        write_jsonl(&images_dir, "images.jsonl", &image_rows);
        fs::create_dir_all(images_dir.join("pics")).unwrap();
        for i in 0..images {
            fs::write(images_dir.join(format!("pics/{i}.png")), format!("image {i}")).unwrap();
        }
        root
    }

    fn input_dirs(pairs: &[(&str, &str)]) -> InputDirs {
        pairs.iter().map(|(k, v)| (k.to_string(), PathBuf::from(v))).collect()
    }

    fn mapping(pairs: &[(&str, &str)]) -> InputsMapping {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn read_output_lines(output_dir: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(output_dir.join(OUTPUT_FILE_NAME))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn media_path(value: &Value) -> String {
        let reference = MediaReference::parse(value).expect("media reference");
        assert_eq!(reference.kind, MediaKind::Path);
        reference.data
    }

    #[tokio::test]
    async fn test_two_sources_produce_one_output_line_per_record() {
        let root = workspace(3, 3);
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        let result = engine
            .run(
                &input_dirs(&[("docs", "docs"), ("images", "images")]),
                &mapping(&[("question", "docs.text"), ("photo", "images.pic")]),
                "out",
                Some("run-42".to_string()),
            )
            .await
            .unwrap();

        let calls = engine.executor().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 3);

        let lines = read_output_lines(&root.path().join("out"));
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line, &json!({"answer": format!("A: doc {i}")}));
        }
        assert_eq!(result.run_id, "run-42");
        assert_eq!(
            result.outputs.iter().map(Record::to_json).collect::<Vec<_>>(),
            lines
        );
    }

    #[tokio::test]
    async fn test_media_references_resolve_against_their_source_dir() {
        let root = workspace(3, 3);
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        engine
            .run(
                &input_dirs(&[("docs", "docs"), ("images", "images")]),
                &mapping(&[("question", "docs.text"), ("photo", "images.pic")]),
                "out",
                None,
            )
            .await
            .unwrap();

        let images_dir = root.path().join("images");
        for (i, input) in engine.executor().calls()[0].iter().enumerate() {
            let path = PathBuf::from(media_path(input.get("photo").unwrap()));
            assert!(path.is_absolute());
            assert_eq!(path, images_dir.join(format!("pics/{i}.png")));
            assert!(path.is_file());
        }
    }

    #[tokio::test]
    async fn test_sequence_fields_resolve_each_item() {
        let root = TempDir::new().unwrap();
        let data_dir = root.path().join("gallery");
        write_jsonl(
            &data_dir,
            "g.jsonl",
            &[json!({"question": "q", "pics": [{"data:image/png;path": "a.png"}, "caption"]})],
        );
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        engine
            .run(&input_dirs(&[("g", "gallery")]), &mapping(&[("question", "g.question"), ("pics", "g.pics")]), "out", None)
            .await
            .unwrap();

        let Some(Value::Sequence(pics)) = engine.executor().calls()[0][0].get("pics").cloned() else {
            panic!("Expected pics sequence");
        };
        assert_eq!(PathBuf::from(media_path(&pics[0])), data_dir.join("a.png"));
        assert_eq!(pics[1], Value::string("caption"));
    }

    #[tokio::test]
    async fn test_unknown_source_fails_before_execution() {
        let root = workspace(3, 3);
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        let err = engine
            .run(
                &input_dirs(&[("docs", "docs")]),
                &mapping(&[("question", "missing_source.text")]),
                "out",
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BatchError::Mapping(MappingError::UnknownSource { ref source_name, .. }) if source_name == "missing_source"
        ));
        assert!(engine.executor().calls().is_empty());
        assert!(!root.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_before_execution() {
        let root = workspace(3, 2);
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        let err = engine
            .run(
                &input_dirs(&[("docs", "docs"), ("images", "images")]),
                &mapping(&[("question", "docs.text"), ("photo", "images.pic")]),
                "out",
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Mapping(MappingError::CountMismatch(_))));
        assert!(engine.executor().calls().is_empty());
        assert!(!root.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_missing_input_dir_names_the_source() {
        let root = workspace(3, 3);
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        let err = engine
            .run(
                &input_dirs(&[("docs", "docs"), ("extra", "does/not/exist")]),
                &mapping(&[("question", "docs.text")]),
                "out",
                None,
            )
            .await
            .unwrap_err();

        match err {
            BatchError::DataSource(e) => {
                assert_eq!(e.source_name, "extra");
                assert_eq!(e.path, root.path().join("does/not/exist"));
            }
            other => panic!("Expected data source error, got {other:?}"),
        }
        assert!(engine.executor().calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_lines_keep_positional_alignment() {
        let root = workspace(3, 3);
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), fail_second_line));

        let result = engine
            .run(&input_dirs(&[("docs", "docs")]), &mapping(&[("question", "docs.text")]), "out", None)
            .await
            .unwrap();

        assert_eq!(result.metadata.failed_lines, 1);
        let lines = read_output_lines(&root.path().join("out"));
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], json!({"answer": "A: doc 0"}));
        assert_eq!(lines[1][ERROR_MARKER_KEY]["line_number"], json!(1));
        assert_eq!(lines[1][ERROR_MARKER_KEY]["kind"], json!("flow_error"));
        assert_eq!(lines[2], json!({"answer": "A: doc 2"}));
    }

    #[tokio::test]
    async fn test_execution_error_propagates_without_output() {
        let root = workspace(3, 3);
        let engine = BatchEngine::new(BrokenExecutor(root.path().to_path_buf()));

        let err = engine
            .run(&input_dirs(&[("docs", "docs")]), &mapping(&[("question", "docs.text")]), "out", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Execution(ExecutionError::Worker(_))));
        assert!(!root.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_repeated_runs_replace_the_output_file() {
        let root = workspace(3, 3);
        let out = root.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join(OUTPUT_FILE_NAME), "stale\nstale\nstale\nstale\nstale\n").unwrap();
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        let dirs = input_dirs(&[("docs", "docs")]);
        let map = mapping(&[("question", "docs.text")]);
        engine.run(&dirs, &map, &out, None).await.unwrap();
        let first = fs::read_to_string(out.join(OUTPUT_FILE_NAME)).unwrap();
        engine.run(&dirs, &map, &out, None).await.unwrap();
        let second = fs::read_to_string(out.join(OUTPUT_FILE_NAME)).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.lines().count(), 3);
        assert!(!second.contains("stale"));
        assert!(!out.join("output.jsonl.tmp").exists());
    }

    #[test]
    fn test_failed_write_removes_staging_file() {
        let out = TempDir::new().unwrap();
        let target = out.path().join(OUTPUT_FILE_NAME);
        // A directory in place of the output file makes the final rename fail
        fs::create_dir_all(&target).unwrap();
        let records = vec![Record::from_json(json!({"answer": "a"})).unwrap()];

        let err = dump_jsonl(&target, &records).unwrap_err();

        assert!(matches!(err, PersistenceError::Write { ref path, .. } if path == &target));
        assert!(!out.path().join("output.jsonl.tmp").exists());
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_flow_output_inside_output_dir_is_persisted_relative() {
        let root = workspace(2, 2);
        let out = root.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("render-0.png"), "render 0").unwrap();
        fs::write(out.join("render-1.png"), "render 1").unwrap();

        fn render(line: usize, input: &Record) -> Option<Record> {
            let mut output = answer(line, input)?;
            let rendered = input.get("out_dir")?.as_str()?.to_string();
            output.insert(
                "render",
                Value::from(json!({"data:image/png;path": format!("{rendered}/render-{line}.png")})),
            );
            Some(output)
        }

        let engine = BatchEngine::new(FakeExecutor::new(root.path(), render));
        let out_dir = out.to_string_lossy().to_string();
        engine
            .run(
                &input_dirs(&[("docs", "docs")]),
                &mapping(&[("question", "docs.text"), ("out_dir", out_dir.as_str())]),
                &out,
                None,
            )
            .await
            .unwrap();

        let reloaded = DirectoryLoader::new().load(&out.join(OUTPUT_FILE_NAME)).unwrap();
        for (i, record) in reloaded.iter().enumerate() {
            let name = media_path(record.get("render").unwrap());
            assert_eq!(name, format!("render-{i}.png"));
            assert_eq!(fs::read_to_string(out.join(&name)).unwrap(), format!("render {i}"));
        }
    }

    #[tokio::test]
    async fn test_persisted_outputs_round_trip_through_loader() {
        let root = workspace(3, 3);
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer_with_image));

        let result = engine
            .run(&input_dirs(&[("docs", "docs")]), &mapping(&[("question", "docs.text")]), "out", None)
            .await
            .unwrap();

        let out = root.path().join("out");
        let reloaded = DirectoryLoader::new().load(&out).unwrap();
        assert_eq!(reloaded, result.outputs);

        for (i, record) in reloaded.iter().enumerate() {
            assert_eq!(record.get("answer"), Some(&Value::string(format!("A: doc {i}"))));
            let name = media_path(record.get("image").unwrap());
            assert!(Path::new(&name).is_relative());
            assert_eq!(fs::read(out.join(&name)).unwrap(), format!("png-{i}").into_bytes());
        }
    }

    #[tokio::test]
    async fn test_declared_inputs_default_to_data_source() {
        let root = TempDir::new().unwrap();
        write_jsonl(
            &root.path().join("data"),
            "rows.jsonl",
            &[json!({"question": "one", "noise": 1}), json!({"question": "two", "noise": 2})],
        );
        let mut executor = FakeExecutor::new(root.path(), answer);
        executor.flow_inputs = vec!["question".to_string()];
        let engine = BatchEngine::new(executor);

        engine
            .run(&input_dirs(&[("data", "data")]), &InputsMapping::new(), "out", None)
            .await
            .unwrap();

        let calls = engine.executor().calls();
        assert_eq!(calls[0].len(), 2);
        for input in &calls[0] {
            assert_eq!(input.keys().cloned().collect::<Vec<_>>(), vec!["question"]);
        }
    }

    #[tokio::test]
    async fn test_undeclared_entry_with_unknown_source_fails_before_execution() {
        let root = workspace(3, 3);
        let mut executor = FakeExecutor::new(root.path(), answer);
        executor.flow_inputs = vec!["question".to_string()];
        let engine = BatchEngine::new(executor);

        let err = engine
            .run(
                &input_dirs(&[("docs", "docs")]),
                &mapping(&[("question", "${docs.text}"), ("extra", "${missing_source.x}")]),
                "out",
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BatchError::Mapping(MappingError::UnknownSource { ref input, .. }) if input == "extra"
        ));
        assert!(engine.executor().calls().is_empty());
        assert!(!root.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_is_persistence_error() {
        let root = workspace(3, 3);
        fs::write(root.path().join("blocked"), "a file, not a directory").unwrap();
        let engine = BatchEngine::new(FakeExecutor::new(root.path(), answer));

        let err = engine
            .run(&input_dirs(&[("docs", "docs")]), &mapping(&[("question", "docs.text")]), "blocked/out", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_echo_command_flow_end_to_end() {
        let root = workspace(2, 2);
        let mut config = FlowConfig::new("sh");
        config.args = vec!["-c".to_string(), "cat".to_string()];
        config.working_dir = root.path().to_path_buf();
        config.inputs = vec!["question".to_string(), "photo".to_string()];
        let engine = BatchEngine::new(CommandExecutor::new(config).unwrap());

        let result = engine
            .run(
                &input_dirs(&[("docs", "docs"), ("images", "images")]),
                &mapping(&[("question", "${docs.text}"), ("photo", "${images.pic}")]),
                "out",
                None,
            )
            .await
            .unwrap();

        let out = root.path().join("out");
        assert_eq!(result.metadata.completed_lines, 2);
        for (i, output) in result.outputs.iter().enumerate() {
            assert_eq!(output.get("question"), Some(&Value::string(format!("doc {i}"))));
            // The echoed input image is copied into the output directory
            let name = media_path(output.get("photo").unwrap());
            assert!(Path::new(&name).is_relative());
            assert_eq!(fs::read_to_string(out.join(&name)).unwrap(), format!("image {i}"));
        }
        assert_eq!(read_output_lines(&out).len(), 2);
    }
}
