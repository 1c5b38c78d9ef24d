use cfgpp_core::{analyze_with, parse, parse_schema, tokenize, validate, Options, RecoveryMode};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashMap;

// ============================================================================
// Test Data: Varying Complexity and Size
// ============================================================================

const TINY: &str = r#"App { value = 42 }"#;

const SMALL: &str = r#"AppConfig {
    name = "test"
    version = 1.0
    enabled = true
    tags = ["a", "b", "c"]
}"#;

const MEDIUM: &str = r#"enum Status { values = ["active", "inactive", "pending"], default = "active" }

Server(string host = "localhost", int port = 8080, bool ssl = false) {
    retries = 3
    Status status = "active"
    url = "http://${HOST:-localhost}:${PORT:-8080}/"
}

Cluster {
    servers = [
        Server(host = "server1.com", port = 8080),
        Server(host = "server2.com", port = 8081),
        Server { host = "server3.com"; port = 8082; status = "inactive" }
    ]
    Database::PostgreSQL {
        host = "${DB_HOST:-db.internal}"
        port = ${DB_PORT:-5432}
        pool = ${DB_POOL:-16}
    }
}"#;

const SCHEMA: &str = r#"
enum Status { values = ["active", "inactive", "pending"] }

schema Server {
    required string host(min_length = 1)
    required int port(min = 1, max = 65535)
    optional bool ssl = false
    optional int retries(min = 0, max = 10)
    optional Status status
    optional string url(pattern = "^https?://")
    validate { port != 22 }
}

schema Database::PostgreSQL {
    required string host
    required int port(min = 1, max = 65535)
    optional int pool(min = 1)
}

schema Cluster {
    required Server[] servers(min_length = 1)
    optional Database::PostgreSQL PostgreSQL
}
"#;

fn generate_large(object_count: usize) -> String {
    let mut source = String::new();
    for i in 0..object_count {
        source.push_str(&format!(
            "Service{i}(int port = {port}) {{\n    name = \"service-{i}\"\n    replicas = {replicas}\n    ratio = 0.{i}\n    tags = [\"a\", \"b\", \"c\"]\n    endpoint = \"${{HOST_{i}:-svc{i}.internal}}:${{PORT:-80}}\"\n}}\n",
            port = 8000 + i,
            replicas = i % 5 + 1,
        ));
    }
    source
}

// ============================================================================
// Lexer
// ============================================================================

fn bench_lexer_tiny(c: &mut Criterion) {
    c.bench_function("lexer_tiny", |b| b.iter(|| tokenize(black_box(TINY)).unwrap()));
}

fn bench_lexer_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer_by_size");
    for (name, source) in [("tiny", TINY), ("small", SMALL), ("medium", MEDIUM)] {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, src| {
            b.iter(|| tokenize(black_box(src)).unwrap());
        });
    }
    group.finish();
}

// ============================================================================
// Parser
// ============================================================================

fn bench_parser_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_object_scaling");
    for size in [10, 100, 1000] {
        let source = generate_large(size);
        let tokens = tokenize(&source).unwrap();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &tokens, |b, tokens| {
            b.iter(|| parse(black_box(tokens.clone()), RecoveryMode::Strict).unwrap());
        });
    }
    group.finish();
}

// ============================================================================
// End to end
// ============================================================================

fn bench_e2e_analysis(c: &mut Criterion) {
    let env: HashMap<String, String> = HashMap::from([("HOST".to_string(), "bench".to_string())]);
    let options = Options::default();
    let mut group = c.benchmark_group("e2e_analysis");
    for (name, source) in [("small", SMALL), ("medium", MEDIUM)] {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, src| {
            b.iter(|| analyze_with(black_box(src), "bench.cfgpp", &options, &env).unwrap());
        });
    }
    group.finish();
}

fn bench_e2e_scaling(c: &mut Criterion) {
    let env: HashMap<String, String> = HashMap::new();
    let options = Options::default();
    let mut group = c.benchmark_group("e2e_object_scaling");
    for size in [10, 100, 1000] {
        let source = generate_large(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, src| {
            b.iter(|| {
                let result = analyze_with(black_box(src), "bench.cfgpp", &options, &env).unwrap();
                result.to_json().unwrap()
            });
        });
    }
    group.finish();
}

fn bench_schema_validation(c: &mut Criterion) {
    let schema = parse_schema(SCHEMA).unwrap();
    let env: HashMap<String, String> = HashMap::new();
    let result = analyze_with(MEDIUM, "bench.cfgpp", &Options::default(), &env).unwrap();

    c.bench_function("schema_parse", |b| b.iter(|| parse_schema(black_box(SCHEMA)).unwrap()));
    c.bench_function("schema_validation", |b| {
        b.iter(|| validate(black_box(&result.document), &schema));
    });
}

criterion_group!(lexer_benches, bench_lexer_tiny, bench_lexer_sizes);
criterion_group!(parser_benches, bench_parser_scaling);
criterion_group!(
    e2e_benches,
    bench_e2e_analysis,
    bench_e2e_scaling,
    bench_schema_validation
);
criterion_main!(lexer_benches, parser_benches, e2e_benches);
