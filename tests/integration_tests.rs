// Integration tests for cfgpp-core using the fixtures under tests/
use cfgpp_core::ast::{Scalar, ValueKind};
use cfgpp_core::error::{CfgppError, IncludeError, Severity};
use cfgpp_core::{analyze, analyze_file, analyze_with, load_schema, Options, RecoveryMode};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

fn get_test_file_path(subdir: &str, filename: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join(subdir)
        .join(filename)
}

fn read_test_file(subdir: &str, filename: &str) -> String {
    let path = get_test_file_path(subdir, filename);
    fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to read test file: {:?}", path))
}

fn no_env() -> HashMap<String, String> {
    HashMap::new()
}

// Valid files that should parse and resolve successfully
mod ok_tests {
    use super::*;

    #[test]
    fn test_primitives() {
        let source = read_test_file("ok", "primitives.cfgpp");
        let result = analyze(&source, "primitives.cfgpp");
        assert!(result.is_ok(), "Should parse successfully: {:?}", result.err());

        let json: serde_json::Value = serde_json::from_str(&result.unwrap().to_json().unwrap()).unwrap();
        let p = &json["Primitives"];
        assert_eq!(p["escaped"], "tab\there \"quoted\"");
        assert_eq!(p["negative"], -7);
        assert_eq!(p["big"], 1500.0);
        assert_eq!(p["nothing"], serde_json::Value::Null);
    }

    #[test]
    fn test_objects() {
        let source = read_test_file("ok", "objects.cfgpp");
        let result = analyze(&source, "objects.cfgpp").unwrap();
        let app = result.document.object("AppConfig").unwrap();

        assert_eq!(app.property("name").unwrap().value.as_str(), Some("test"));
        assert_eq!(app.property("port").unwrap().value.as_int(), Some(8080));
        assert_eq!(
            app.property("hosts").unwrap().declared_type.as_ref().unwrap().to_string(),
            "string[]"
        );
        assert_eq!(app.property("ports").unwrap().value.as_array().unwrap().len(), 2);

        let file = app.nested("Logging").unwrap().nested("File").unwrap();
        assert_eq!(file.property("rotate").unwrap().value.as_bool(), Some(true));

        let primary = app.property("primary").unwrap().value.as_constructor().unwrap();
        assert_eq!(primary.type_name.segments, vec!["Database", "PostgreSQL"]);
        assert!(primary.body.is_none());
    }

    #[test]
    fn test_namespaces() {
        let source = read_test_file("ok", "namespaces.cfgpp");
        let result = analyze(&source, "namespaces.cfgpp").unwrap();

        let db = result.document.object("Database::PostgreSQL").unwrap();
        assert_eq!(db.type_name.segments, vec!["Database", "PostgreSQL"]);

        let json = result.to_value();
        let json = serde_json::to_value(json).unwrap();
        assert_eq!(json["Cache::Redis::Cluster"]["host"], "redis");
        assert_eq!(json["Cache::Redis::Cluster"]["nodes"], 3);
    }

    #[test]
    fn test_enums() {
        let source = read_test_file("ok", "enums.cfgpp");
        let result = analyze(&source, "enums.cfgpp").unwrap();

        let level = result.document.enum_def("Level").unwrap();
        assert_eq!(level.values, vec!["debug", "info", "warn"]);
        assert_eq!(level.default.as_deref(), Some("info"));

        let schema = load_schema(get_test_file_path("schemas", "app.cfgpp")).unwrap();
        let validation = result.validate(&schema);
        assert!(validation.is_valid, "{:?}", validation.diagnostics);
    }

    #[test]
    fn test_variables_defaults() {
        let source = read_test_file("ok", "variables.cfgpp");
        let result = analyze_with(&source, "variables.cfgpp", &Options::default(), &no_env()).unwrap();
        let server = result.document.object("Server").unwrap();

        assert_eq!(server.property("host").unwrap().value.as_str(), Some("localhost"));
        assert_eq!(server.property("port").unwrap().value.as_int(), Some(8080));
        assert_eq!(server.property("url").unwrap().value.as_str(), Some("http://localhost:8080/"));
        assert_eq!(server.property("debug").unwrap().value.as_bool(), Some(false));
        assert_eq!(server.property("mode").unwrap().value.as_str(), Some("production"));
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_variables_from_environment() {
        let source = read_test_file("ok", "variables.cfgpp");
        let env = HashMap::from([
            ("HOST".to_string(), "prod.example.com".to_string()),
            ("PORT".to_string(), "9000".to_string()),
            ("FALLBACK_MODE".to_string(), "staging".to_string()),
        ]);
        let result = analyze_with(&source, "variables.cfgpp", &Options::default(), &env).unwrap();
        let server = result.document.object("Server").unwrap();

        assert_eq!(server.property("port").unwrap().value.as_int(), Some(9000));
        assert_eq!(
            server.property("url").unwrap().value.as_str(),
            Some("http://prod.example.com:9000/")
        );
        assert_eq!(server.property("mode").unwrap().value.as_str(), Some("staging"));
    }

    #[test]
    fn test_all_fixtures_round_trip_through_display() {
        for name in ["primitives", "objects", "namespaces", "enums", "variables"] {
            let source = read_test_file("ok", &format!("{name}.cfgpp"));
            let mut original = analyze(&source, "x.cfgpp").unwrap().unresolved_document;
            let printed = original.to_string();
            let mut reparsed = analyze(&printed, "x.cfgpp")
                .unwrap_or_else(|e| panic!("{name}: canonical output does not parse: {e}\n{printed}"))
                .unresolved_document;

            original.strip_positions();
            reparsed.strip_positions();
            assert_eq!(original.entries, reparsed.entries, "{name}");
        }
    }
}

mod include_tests {
    use super::*;

    #[test]
    fn test_includes_are_spliced_in() {
        let path = get_test_file_path("includes", "main.cfgpp");
        let result = analyze_file(&path, &Options::default()).unwrap();

        let names: Vec<String> = result
            .document
            .entries
            .iter()
            .filter_map(|e| e.entry_name())
            .collect();
        assert_eq!(names, vec!["Logging", "Database::PostgreSQL", "App"]);
        assert_eq!(result.document.includes().count(), 0);
        assert_eq!(result.unresolved_document.includes().count(), 2);

        let schema = load_schema(get_test_file_path("schemas", "app.cfgpp")).unwrap();
        let validation = result.validate(&schema);
        assert!(validation.is_valid, "{:?}", validation.diagnostics);
    }

    #[test]
    fn test_two_file_cycle() {
        let path = get_test_file_path("includes", "cycle_a.cfgpp");
        let err = analyze_file(&path, &Options::default()).unwrap_err();
        match err {
            CfgppError::Include(IncludeError::CircularInclude { chain, .. }) => {
                let names: Vec<_> = chain
                    .iter()
                    .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                    .collect();
                assert_eq!(names, vec!["cycle_a.cfgpp", "cycle_b.cfgpp", "cycle_a.cfgpp"]);
            }
            other => panic!("Expected a circular include, got {other:?}"),
        }
    }

    #[test]
    fn test_self_include() {
        let path = get_test_file_path("includes", "self.cfgpp");
        let err = analyze_file(&path, &Options::default()).unwrap_err();
        match err {
            CfgppError::Include(IncludeError::CircularInclude { chain, .. }) => {
                assert_eq!(chain.len(), 2);
                assert_eq!(chain.first(), chain.last());
            }
            other => panic!("Expected a circular include, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_include_is_fatal_when_strict() {
        let path = get_test_file_path("includes", "missing.cfgpp");
        let err = analyze_file(&path, &Options::default()).unwrap_err();
        assert!(matches!(err, CfgppError::Include(IncludeError::MissingFile { .. })));
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn test_missing_include_is_skipped_when_lenient() {
        let path = get_test_file_path("includes", "missing.cfgpp");
        let options = Options::default().recovery(RecoveryMode::Lenient);
        let result = analyze_file(&path, &options).unwrap();

        assert!(result.document.object("Kept").is_some());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].severity, Severity::Error);
    }
}

mod validation_tests {
    use super::*;

    #[test]
    fn test_schema_errors_are_reported_together() {
        let source = r#"
            App {
                port = 99999
                status = "pending"
                tags = ["a"]
            }
        "#;
        let result = analyze_with(source, "app.cfgpp", &Options::default(), &no_env()).unwrap();
        let schema = load_schema(get_test_file_path("schemas", "app.cfgpp")).unwrap();
        let validation = result.validate(&schema);

        let errors: Vec<_> = validation.errors().map(|d| d.message.clone()).collect();
        assert_eq!(
            errors,
            vec![
                "missing required field 'name'".to_string(),
                r#""pending" not in ["active","inactive"]"#.to_string(),
                "field 'port' value 99999 exceeds max 65535".to_string(),
            ]
        );
    }

    #[test]
    fn test_rule_violation() {
        let source = r#"App { name = "ssh", port = 22 }"#;
        let result = analyze(source, "app.cfgpp").unwrap();
        let schema = load_schema(get_test_file_path("schemas", "app.cfgpp")).unwrap();
        let validation = result.validate(&schema);

        assert!(!validation.is_valid);
        assert_eq!(validation.diagnostics.len(), 1);
        assert_eq!(validation.diagnostics[0].message, "rule violated: port != 22");
    }

    #[test]
    fn test_unresolved_variable_fails_validation() {
        let source = r#"App { name = "x", port = ${APP_PORT} }"#;
        let result = analyze_with(source, "app.cfgpp", &Options::default(), &no_env()).unwrap();
        let port = &result.document.object("App").unwrap().property("port").unwrap().value;
        assert_eq!(port.kind, ValueKind::Unresolved("APP_PORT".to_string()));

        let schema = load_schema(get_test_file_path("schemas", "app.cfgpp")).unwrap();
        let validation = result.validate(&schema);
        assert!(!validation.is_valid);
        assert!(validation
            .errors()
            .any(|d| d.message == "unresolved variable 'APP_PORT'"));
    }

    #[test]
    fn test_coerced_environment_value_validates() {
        let source = r#"App { name = "x", port = ${APP_PORT:-80} }"#;
        let env = HashMap::from([("APP_PORT".to_string(), "8443".to_string())]);
        let result = analyze_with(source, "app.cfgpp", &Options::default(), &env).unwrap();
        let port = &result.document.object("App").unwrap().property("port").unwrap().value;
        assert_eq!(port.as_scalar(), Some(&Scalar::Int(8443)));

        let schema = load_schema(get_test_file_path("schemas", "app.cfgpp")).unwrap();
        assert!(result.validate(&schema).is_valid);
    }
}

// Schema files that import other schema files
mod schema_import_tests {
    use super::*;

    #[test]
    fn test_imported_definitions_are_merged() {
        let schema = load_schema(get_test_file_path("schemas", "service.cfgpp")).unwrap();
        assert!(schema.schema("Service").is_some());
        assert!(schema.schema("Logging").is_some());
        assert_eq!(schema.enum_def("Level").unwrap().values, vec!["info", "warn"]);
        assert_eq!(schema.imports.len(), 1);

        let source = r#"Service { name = "api", logging = Logging { level = "debug" } }"#;
        let result = analyze_with(source, "service.cfgpp", &Options::default(), &no_env()).unwrap();
        let validation = result.validate(&schema);
        let errors: Vec<_> = validation.errors().map(|d| d.message.clone()).collect();
        assert_eq!(errors, vec![r#""debug" not in ["info","warn"]"#.to_string()]);
        assert_eq!(validation.errors().next().unwrap().path, "Service.logging.level");
    }

    #[test]
    fn test_circular_schema_import() {
        let err = load_schema(get_test_file_path("schemas", "cycle_a.cfgpp")).unwrap_err();
        match err {
            CfgppError::Include(IncludeError::CircularInclude { chain, .. }) => {
                let names: Vec<_> = chain
                    .iter()
                    .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                    .collect();
                assert_eq!(names, vec!["cycle_a.cfgpp", "cycle_b.cfgpp", "cycle_a.cfgpp"]);
            }
            other => panic!("Expected a circular import, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_schema_import() {
        let err = load_schema(get_test_file_path("schemas", "missing_import.cfgpp")).unwrap_err();
        match err {
            CfgppError::Include(IncludeError::MissingFile { path, line, .. }) => {
                assert!(path.ends_with("nowhere.cfgpp"));
                assert_eq!(line, 1);
            }
            other => panic!("Expected a missing import, got {other:?}"),
        }
    }
}
