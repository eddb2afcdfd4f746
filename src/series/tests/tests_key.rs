//! Series key parsing.

#[cfg(test)]
mod tests {
    use crate::series::{
        Tag, Tags, composite_key, escape, make_key, parse_key, series_and_field, unescape,
    };

    #[test]
    fn splits_field_at_first_hash() {
        assert_eq!(
            series_and_field(b"cpu,host=a#value"),
            (&b"cpu,host=a"[..], &b"value"[..])
        );
        assert_eq!(
            series_and_field(b"cpu#usage#idle"),
            (&b"cpu"[..], &b"usage#idle"[..])
        );
        assert_eq!(series_and_field(b"cpu,host=a"), (&b"cpu,host=a"[..], &b""[..]));
    }

    #[test]
    fn escaped_hash_is_not_a_separator() {
        let (series, field) = series_and_field(br"cpu,host=a\#1#value");
        assert_eq!(series, br"cpu,host=a\#1");
        assert_eq!(field, b"value");

        let (name, tags) = parse_key(series);
        assert_eq!(name, b"cpu");
        assert_eq!(tags.get(b"host"), Some(&b"a#1"[..]));
    }

    #[test]
    fn parses_measurement_and_sorted_tags() {
        let (name, tags) = parse_key(b"cpu,region=west,host=a");
        assert_eq!(name, b"cpu");
        assert_eq!(tags.len(), 2);
        let keys: Vec<&[u8]> = tags.iter().map(|t| t.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"host"[..], &b"region"[..]]);
        assert_eq!(tags.get(b"region"), Some(&b"west"[..]));
        assert_eq!(tags.get(b"zone"), None);
        assert_eq!(tags.to_string(), "host=a,region=west");
    }

    #[test]
    fn measurement_without_tags() {
        let (name, tags) = parse_key(b"mem");
        assert_eq!(name, b"mem");
        assert!(tags.is_empty());

        let (name, tags) = parse_key(b"");
        assert!(name.is_empty());
        assert!(tags.is_empty());
    }

    /// # Scenario
    /// Measurement, tag key and tag value all contain escaped separators.
    ///
    /// # Expected behavior
    /// Splitting ignores the escaped bytes and the parts come back
    /// unescaped.
    #[test]
    fn escaped_separators() {
        let (name, tags) = parse_key(br"disk\ io\,x,path\=dev=/dev/sda\,1,label=a\ b");
        assert_eq!(name, b"disk io,x");
        assert_eq!(tags.get(b"path=dev"), Some(&b"/dev/sda,1"[..]));
        assert_eq!(tags.get(b"label"), Some(&b"a b"[..]));
    }

    #[test]
    fn lenient_on_odd_segments() {
        let (name, tags) = parse_key(b"cpu,,host=a,flag");
        assert_eq!(name, b"cpu");
        assert_eq!(tags.get(b"host"), Some(&b"a"[..]));
        assert_eq!(tags.get(b"flag"), Some(&b""[..]));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn unescape_keeps_other_backslashes() {
        assert_eq!(unescape(br"a\nb"), br"a\nb");
        assert_eq!(unescape(br"trailing\"), br"trailing\");
        assert_eq!(unescape(br"a\,b\=c\ d\#e"), b"a,b=c d#e");
        assert_eq!(escape(b"a,b=c d#e"), br"a\,b\=c\ d\#e");
    }

    #[test]
    fn make_key_parses_back() {
        let tags = Tags::new(vec![Tag::new("z one", "1,2"), Tag::new("host", "a=b")]);
        let key = make_key(b"my measurement", &tags);
        assert_eq!(key, br"my\ measurement,host=a\=b,z\ one=1\,2");

        let (name, parsed) = parse_key(&key);
        assert_eq!(name, b"my measurement");
        assert_eq!(parsed, tags);

        let full = composite_key(&key, b"value");
        assert_eq!(series_and_field(&full), (&key[..], &b"value"[..]));
    }
}
