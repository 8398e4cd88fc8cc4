use criterion::{Criterion, criterion_group, criterion_main};
use ocra::{RawGrammar, Registry};

const JSON_GRAMMAR: &str = r##"{
    "scopeName": "source.json",
    "patterns": [{"include": "#value"}],
    "repository": {
        "value": {
            "patterns": [
                {"include": "#constant"},
                {"include": "#number"},
                {"include": "#string"},
                {"include": "#array"},
                {"include": "#object"}
            ]
        },
        "constant": {"match": "\\b(?:true|false|null)\\b", "name": "constant.language.json"},
        "number": {"match": "-?(?:0|[1-9]\\d*)(?:\\.\\d+)?(?:[eE][+-]?\\d+)?", "name": "constant.numeric.json"},
        "string": {
            "begin": "\"",
            "beginCaptures": {"0": {"name": "punctuation.definition.string.begin.json"}},
            "end": "\"",
            "endCaptures": {"0": {"name": "punctuation.definition.string.end.json"}},
            "name": "string.quoted.double.json",
            "patterns": [{"match": "\\\\.", "name": "constant.character.escape.json"}]
        },
        "array": {
            "begin": "\\[",
            "end": "\\]",
            "name": "meta.structure.array.json",
            "patterns": [{"include": "#value"}, {"match": ",", "name": "punctuation.separator.array.json"}]
        },
        "object": {
            "begin": "\\{",
            "end": "\\}",
            "name": "meta.structure.dictionary.json",
            "patterns": [
                {"include": "#string"},
                {
                    "begin": ":",
                    "end": "(,)|(?=\\})",
                    "endCaptures": {"1": {"name": "punctuation.separator.dictionary.pair.json"}},
                    "name": "meta.structure.dictionary.value.json",
                    "patterns": [{"include": "#value"}]
                }
            ]
        }
    }
}"##;

fn criterion_benchmark(c: &mut Criterion) {
    let json_input = r#"{"name": "John", "age": 30, "active": true, "score": 95.5, "tags": ["developer", "rust"], "address": null}"#;
    let registry = Registry::new();
    registry.add_grammar(RawGrammar::from_json(JSON_GRAMMAR).unwrap());
    let grammar = registry.load_grammar("source.json").unwrap().unwrap();

    c.bench_function("json tokenization", |b| {
        b.iter(|| {
            let result = grammar.tokenize_line(json_input, None, None);
            std::hint::black_box(result);
        })
    });

    c.bench_function("json binary tokenization", |b| {
        b.iter(|| {
            let result = grammar.tokenize_line_binary(json_input, None, None);
            std::hint::black_box(result);
        })
    });

    let document: String = (0..200).map(|_| format!("{json_input}\n")).collect();
    c.bench_function("json document", |b| {
        b.iter(|| {
            let result = grammar.tokenize_lines(&document);
            std::hint::black_box(result);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
