use infinitetcp_wire::{Codec, CodecError, JsonCodec, TextCodec, ensure_single_line};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
enum Shape {
    Circle { radius: f64 },
    Polygon(Vec<(i32, i32)>),
    Empty,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Drawing {
    name: String,
    shapes: Vec<Shape>,
    tags: BTreeMap<String, String>,
}

fn sample() -> Drawing {
    let mut tags = BTreeMap::new();
    tags.insert("author".into(), "line one\nline two".into());
    Drawing {
        name: "sketch".into(),
        shapes: vec![
            Shape::Circle { radius: 2.5 },
            Shape::Polygon(vec![(0, 0), (1, 0), (0, 1)]),
            Shape::Empty,
        ],
        tags,
    }
}

#[test]
fn test_nested_value_survives_a_line() {
    let codec = JsonCodec::new();
    let drawing = sample();

    let line = codec.encode(&drawing).expect("Encode failed");
    ensure_single_line(&line).expect("JSON output must fit on one line");

    let decoded: Drawing = codec.decode(&line).expect("Decode failed");
    assert_eq!(decoded, drawing);
}

#[test]
fn test_json_decode_of_wrong_shape_is_decode_error() {
    let codec = JsonCodec::<Drawing>::new();
    let result = codec.decode(r#"{"name":"x"}"#);
    assert!(matches!(result, Err(CodecError::Decode(_))));
}

#[test]
fn test_codec_as_trait_object() {
    let codecs: Vec<Box<dyn Codec<String>>> =
        vec![Box::new(TextCodec::new()), Box::new(JsonCodec::new())];

    for codec in &codecs {
        let line = codec.encode(&"ping".to_string()).unwrap();
        assert_eq!(codec.decode(&line).unwrap(), "ping");
    }
    assert_eq!(codecs[1].encode(&"ping".to_string()).unwrap(), "\"ping\"");
}
