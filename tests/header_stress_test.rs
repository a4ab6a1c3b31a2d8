//! Header Stress Tests
//!
//! Covers:
//! - `HeaderSet` ordering persistence with large counts
//! - exact casing retention with case-insensitive lookup

use relaynet::HeaderSet;

#[test]
fn test_ordered_headers_stress() {
    let mut headers = HeaderSet::new();
    let count = 1000;

    for i in 0..count {
        headers.append(format!("X-{}", i), "value");
    }

    assert_eq!(headers.len(), count);
    let names: Vec<_> = headers.names().collect();
    for (i, name) in names.iter().enumerate() {
        assert_eq!(*name, format!("X-{}", i));
    }
    assert_eq!(headers.to_header_map().unwrap().len(), count);
}

#[test]
fn test_repeated_names_stay_together() {
    let mut headers = HeaderSet::new();
    for i in 0..500 {
        headers.append(if i % 2 == 0 { "x-rep" } else { "X-REP" }, i.to_string());
        headers.append(format!("X-Other-{}", i), "v");
    }

    assert_eq!(headers.len(), 501);
    assert_eq!(headers.value_count(), 1000);
    assert_eq!(headers.names().next(), Some("x-rep"));
    let values: Vec<_> = headers.get_all("X-Rep").collect();
    assert_eq!(values.len(), 500);
    assert_eq!(values[499], "499");
}

#[test]
fn test_case_sensitive_headers_exact_match() {
    let mut headers = HeaderSet::new();
    headers.append("Content-Type", "json");
    headers.append("User-AGENT", "test");
    headers.append("x-custom-HEADER", "val");

    let stored: Vec<_> = headers.names().collect();
    assert_eq!(stored, vec!["Content-Type", "User-AGENT", "x-custom-HEADER"]);

    assert_eq!(headers.get("content-type"), Some("json"));
    assert_eq!(headers.get("USER-AGENT"), Some("test"));
    assert_eq!(headers.recorded_name("X-CUSTOM-header"), Some("x-custom-HEADER"));
}
