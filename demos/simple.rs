use cfgpp_core::{analyze, parse_schema};

fn main() {
    let config = r#"
        enum Level { values = ["debug", "info", "warn"], default = "info" }

        AppConfig {
            name = "demo"
            port = ${PORT:-8080}
            Level level = "info"
            Database::PostgreSQL {
                host = "${DB_HOST:-localhost}"
                port = 5432
            }
        }
    "#;

    let schema = r#"
        schema AppConfig {
            required string name
            required int port(min = 1, max = 65535)
        }
        schema Database::PostgreSQL { required string host; required int port }
    "#;

    let result = match analyze(config, "demo.cfgpp") {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{:?}", e.report("demo.cfgpp", config));
            return;
        }
    };

    match result.to_json() {
        Ok(json) => println!("Resolved configuration:\n{json}"),
        Err(e) => eprintln!("Failed to serialize: {e}"),
    }

    match parse_schema(schema) {
        Ok(schema) => {
            let validation = result.validate(&schema);
            for diagnostic in &validation.diagnostics {
                println!("{diagnostic}");
            }
            println!("valid: {}", validation.is_valid);
        }
        Err(e) => eprintln!("{:?}", e.report("schema", schema)),
    }
}
