#![no_main]

use libfuzzer_sys::fuzz_target;
use xhr_fetch::form::{self, FormData};
use xhr_fetch::headers::Headers;

// Boundaries to declare, the first byte picks one (or none).
const BOUNDARIES: &[&str] = &["----formdata-fuzz", "x", "----formdata-0123456789abcdef"];

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let declared = BOUNDARIES.get(data[0] as usize % (BOUNDARIES.len() + 1)).copied();
    let input = &data[1..];

    check_form(input, declared);

    // Header blocks never panic, and whatever is kept is valid to set again.
    let text = String::from_utf8_lossy(input);
    let headers = Headers::parse_raw(&text);
    let mut copy = Headers::new();
    for (name, value) in headers.iter() {
        copy.append(name, value).expect("parsed header is valid");
    }
    assert_eq!(copy.len(), headers.len());

    // Arbitrary name/value pairs are either accepted or rejected, never panic.
    if let Some((name, value)) = text.split_once(':') {
        let mut h = Headers::new();
        if h.append(name, value).is_ok() {
            assert!(h.has(name));
        }
    }
});

// Anything that parses must survive encoding with its own boundary.
fn check_form(input: &[u8], declared: Option<&str>) {
    let Ok(parsed) = form::decode(input, declared) else {
        return;
    };
    let Some(boundary) = first_line_boundary(input) else {
        return;
    };
    if parsed.is_empty() {
        return;
    }
    let encoded = form::encode(&parsed, &boundary);
    let again = form::decode(&encoded, Some(&boundary)).expect("re-encoded form parses");
    assert_eq!(again.len(), parsed.len());
    assert_forms_eq(&parsed, &again);
}

fn first_line_boundary(input: &[u8]) -> Option<String> {
    let end = input.windows(2).position(|w| w == b"\r\n")?;
    let line = input[..end].strip_prefix(b"--")?;
    String::from_utf8(line.to_vec()).ok()
}

fn assert_forms_eq(a: &FormData, b: &FormData) {
    for ((an, av), (bn, bv)) in a.entries().zip(b.entries()) {
        assert_eq!(an, bn);
        match (av.as_text(), bv.as_text()) {
            (Some(x), Some(y)) => assert_eq!(x, y),
            (None, None) => {
                let (x, y) = (av.as_file().unwrap(), bv.as_file().unwrap());
                assert_eq!(x.name(), y.name());
                assert_eq!(x.blob().as_bytes(), y.blob().as_bytes());
            }
            _ => panic!("part kind changed"),
        }
    }
}
