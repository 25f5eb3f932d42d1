//! Parsing and extraction performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use jsongen::lexer::tokenize_source;
use jsongen::*;
use std::fs;
use tempfile::TempDir;

const INTERFACE: &str = r#"
namespace WPEFramework {
namespace Exchange {

    // @json 1.0.0
    struct EXTERNAL IDictionary : virtual public Core::IUnknown {
        enum { ID = 0x0200 };

        enum class Type : uint8_t { STRING, NUMBER, BOOLEAN };

        struct Entry {
            string key;
            Type type;
            Core::OptionalType<string> value;
        };

        // @event
        struct EXTERNAL INotification : virtual public Core::IUnknown {
            enum { ID = 0x0201 };
            // @brief Signals a changed value
            virtual void Modified(const string& path /* @index */, const string& key, const string& value) = 0;
        };

        virtual Core::hresult Register(INotification* sink) = 0;
        virtual Core::hresult Unregister(INotification* sink) = 0;

        // @brief Reads a value
        // @param path Namespace of the key
        virtual Core::hresult Get(const string& path, const string& key, string& value /* @out */) const = 0;
        // @brief Writes a value
        virtual Core::hresult Set(const string& path, const string& key, const string& value) = 0;
        // @property
        // @brief Entries of a namespace
        virtual Core::hresult Entries(const string& path /* @index */, Entry& entry /* @out */) const = 0;
    };
}
}
"#;

fn large_interface() -> String {
    let mut content = String::from(
        "namespace Exchange {\n// @json 1.0.0\nstruct ILarge : virtual public Core::IUnknown {\nenum { ID = 1 };\n",
    );
    for i in 0..500 {
        content.push_str(&format!(
            "// @brief Method {i}\nvirtual Core::hresult Method{i}(const uint32_t a{i}, string& b{i} /* @out */) = 0;\n"
        ));
    }
    content.push_str("};\n}\n");
    content
}

fn bench_tokenize(c: &mut Criterion) {
    c.bench_function("tokenize_interface", |b| {
        b.iter(|| tokenize_source(black_box(INTERFACE), "IDictionary.h").unwrap())
    });
}

fn bench_parse(c: &mut Criterion) {
    let large = large_interface();
    c.bench_function("parse_interface", |b| {
        b.iter(|| parse_source(black_box(INTERFACE), "IDictionary.h").unwrap())
    });
    c.bench_function("parse_large_interface", |b| {
        b.iter(|| parse_source(black_box(&large), "ILarge.h").unwrap())
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let input_path = temp_dir.path().join("IDictionary.h");
    fs::write(&input_path, INTERFACE).unwrap();
    let inputs = vec![input_path];

    c.bench_function("header_to_schema", |b| {
        b.iter(|| {
            let mut generator = Generator::new(GeneratorOptions::default()).unwrap();
            let report = generator.run(black_box(&inputs));
            assert_eq!(report.error_count(), 0);
            report
        })
    });
}

criterion_group!(benches, bench_tokenize, bench_parse, bench_pipeline);
criterion_main!(benches);
