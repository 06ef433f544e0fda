use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use redmatch::{resolve_graph, Compiler, Materializer, Row, Schema, TransformConfig};

const DICTIONARY: &str = r#"[
  {"field_name": "record_id", "field_label": "Record ID", "field_type": "text"},
  {"field_name": "pat_sex", "field_label": "Sex", "field_type": "radio",
   "select_choices_or_calculations": "1, Male | 2, Female"},
  {"field_name": "dob", "field_label": "Date of birth", "field_type": "text",
   "text_validation_type_or_show_slider_number": "date_ymd"},
  {"field_name": "dx", "field_label": "Diagnoses", "field_type": "checkbox",
   "select_choices_or_calculations": "1, Hypertension | 2, Diabetes | 3, Asthma"},
  {"field_name": "weight", "field_label": "Weight", "field_type": "text",
   "text_validation_type_or_show_slider_number": "number"}
]"#;

const SOURCE: &str = "TRUE { Organization<org>: * name = 'Clinic' }
TRUE { Patient<p>: * identifier[0].value = VALUE(record_id) * managingOrganization = REF(Organization<org>) }
NOTNULL(dob) { Patient<p>: * birthDate = VALUE(dob) }
VALUE(pat_sex) = 1 { Patient<p>: * gender = CODE_LITERAL(male) } ELSE { Patient<p>: * gender = CODE_LITERAL(female) }
NOTNULL(weight) { Observation<w>: * valueQuantity.value = VALUE(weight) * subject = REF(Patient<p>) }
REPEAT(1..3: x) VALUE(dx___${x}) = 1 { Condition<c${x}>: * code = CONCEPT(dx___${x}) * subject = REF(Patient<p>) }
MAPPINGS: {
  dx___1 'Hypertension' -> http://snomed.info/sct|38341003;
  dx___2 'Diabetes' -> http://snomed.info/sct|73211009;
  dx___3 'Asthma' -> http://snomed.info/sct|195967001;
}";

fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            Row::new()
                .set("record_id", i.to_string())
                .set("pat_sex", if i % 2 == 0 { "1" } else { "2" })
                .set("dob", format!("19{:02}-01-15", i % 100))
                .set("weight", format!("{}.2", 40 + i % 60))
                .set(&format!("dx___{}", 1 + i % 3), "1")
        })
        .collect()
}

fn bench_throughput(c: &mut Criterion) {
    let schema = Schema::from_redcap_json(DICTIONARY).unwrap();
    let doc = Compiler::new().with_schema(&schema).compile(SOURCE);
    let resolution = resolve_graph(&doc);

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &n in &[100, 1_000] {
        let rows = rows(n);
        for parallel in [false, true] {
            let config = TransformConfig {
                parallel,
                report_missing_values: false,
                ..TransformConfig::default()
            };
            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, n), &rows, |b, rows| {
                let materializer =
                    Materializer::new(&doc, &schema, &resolution).with_config(config.clone());
                b.iter(|| materializer.run(rows).unwrap());
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
