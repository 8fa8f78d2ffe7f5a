//! Declarative field-pattern table.
//!
//! Each [`LinePattern`] names the fields it extracts, how it is matched
//! against a line ([`MatchRule`]), and converts every captured literal to
//! `f64`. New sensor protocols add patterns here without touching the
//! acquisition loop.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Numeric literal accepted in device output: signed, fractional or integer.
/// No exponents, no `inf`/`nan`.
pub const FLOAT_LITERAL: &str = r"[-+]?(?:\d*\.\d+|\d+)";

/// How a pattern is applied to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Must match from the start of the line.
    Anchored,
    /// May match anywhere in the line.
    Search,
}

/// A captured literal that did not convert to a finite float.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub text: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {} has invalid value '{}'", self.field, self.text)
    }
}

impl std::error::Error for FieldError {}

/// Compiled pattern extracting one or more float fields from a line.
#[derive(Debug)]
pub struct LinePattern {
    name: &'static str,
    rule: MatchRule,
    fields: &'static [&'static str],
    regex: Regex,
}

impl LinePattern {
    /// Builds a pattern from a template.
    ///
    /// Every `{field}` placeholder in `template` becomes a named capture of
    /// [`FLOAT_LITERAL`]. The rest of the template is regex syntax.
    pub fn new(
        name: &'static str,
        rule: MatchRule,
        template: &str,
        fields: &'static [&'static str],
    ) -> Result<Self, regex::Error> {
        let mut source = String::new();
        if rule == MatchRule::Anchored {
            source.push('^');
        }
        let mut body = template.to_string();
        for field in fields {
            body = body.replace(
                &format!("{{{}}}", field),
                &format!("(?P<{}>{})", field, FLOAT_LITERAL),
            );
        }
        source.push_str(&body);

        Ok(Self {
            name,
            rule,
            fields,
            regex: Regex::new(&source)?,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rule(&self) -> MatchRule {
        self.rule
    }

    /// Field names in extraction order.
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Returns `true` if the line matches, without converting values.
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Extracts the field values in declaration order.
    ///
    /// `Ok(None)` means the line does not match. `Err` means it matched
    /// but a captured literal is not a finite float.
    pub fn extract(&self, line: &str) -> Result<Option<Vec<f64>>, FieldError> {
        let Some(captures) = self.regex.captures(line) else {
            return Ok(None);
        };

        let mut values = Vec::with_capacity(self.fields.len());
        for &field in self.fields {
            let text = captures.name(field).map(|m| m.as_str()).unwrap_or("");
            let value = text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| FieldError {
                    field,
                    text: text.to_string(),
                })?;
            values.push(value);
        }
        Ok(Some(values))
    }
}

/// Builds a built-in pattern. Templates are constants, so failure is a bug.
fn builtin(
    name: &'static str,
    rule: MatchRule,
    template: &str,
    fields: &'static [&'static str],
) -> LinePattern {
    LinePattern::new(name, rule, template, fields)
        .unwrap_or_else(|e| panic!("built-in pattern '{}' does not compile: {}", name, e))
}

/// First line of a dual-line reading.
pub static TEMPERATURE_PAIR: LazyLock<LinePattern> = LazyLock::new(|| {
    builtin(
        "temperature pair",
        MatchRule::Anchored,
        r"DS18B20 Temperature:\s*{reference_temp_c}\s*°C\s+Thermistor Temperature:\s*{thermistor_temp_c}\s*°C",
        &["reference_temp_c", "thermistor_temp_c"],
    )
});

/// Second line of a dual-line reading.
pub static VOLTAGE_RESISTANCE_PAIR: LazyLock<LinePattern> = LazyLock::new(|| {
    builtin(
        "voltage/resistance pair",
        MatchRule::Anchored,
        r"Thermistor Voltage:\s*{thermistor_voltage_v}\s*V\s+Resistance:\s*{thermistor_resistance_ohm}\s*Ω",
        &["thermistor_voltage_v", "thermistor_resistance_ohm"],
    )
});

/// Reference temperature anywhere in a line (accumulator protocol).
pub static REFERENCE_TEMPERATURE: LazyLock<LinePattern> = LazyLock::new(|| {
    builtin(
        "reference temperature",
        MatchRule::Search,
        r"DS18B20 Temperature:\s*{reference_temp_c}",
        &["reference_temp_c"],
    )
});

/// Thermistor voltage anywhere in a line (accumulator protocol).
pub static THERMISTOR_VOLTAGE: LazyLock<LinePattern> = LazyLock::new(|| {
    builtin(
        "thermistor voltage",
        MatchRule::Search,
        r"Thermistor Voltage:\s*{thermistor_voltage_v}",
        &["thermistor_voltage_v"],
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_pair_extracts_both_fields() {
        let line = "DS18B20 Temperature: 23.5 °C  Thermistor Temperature: 24.1 °C";
        assert_eq!(
            TEMPERATURE_PAIR.extract(line).unwrap(),
            Some(vec![23.5, 24.1])
        );
    }

    #[test]
    fn test_temperature_pair_accepts_tab_separator() {
        // Firmware separates the two halves with a tab.
        let line = "DS18B20 Temperature: -1000.0 °C\tThermistor Temperature: 28.6 °C";
        assert_eq!(
            TEMPERATURE_PAIR.extract(line).unwrap(),
            Some(vec![-1000.0, 28.6])
        );
    }

    #[test]
    fn test_anchored_pattern_rejects_prefix() {
        let line = "junk DS18B20 Temperature: 23.5 °C  Thermistor Temperature: 24.1 °C";
        assert_eq!(TEMPERATURE_PAIR.extract(line).unwrap(), None);
        assert_eq!(TEMPERATURE_PAIR.rule(), MatchRule::Anchored);
    }

    #[test]
    fn test_voltage_pair_extracts_both_fields() {
        let line = "Thermistor Voltage: 1.234 V  Resistance: 10123.5 Ω";
        assert_eq!(
            VOLTAGE_RESISTANCE_PAIR.extract(line).unwrap(),
            Some(vec![1.234, 10123.5])
        );
        assert_eq!(
            VOLTAGE_RESISTANCE_PAIR.fields(),
            &["thermistor_voltage_v", "thermistor_resistance_ohm"]
        );
    }

    #[test]
    fn test_literal_forms() {
        for (text, expected) in [("20", 20.0), ("+1.5", 1.5), ("-3", -3.0), (".25", 0.25)] {
            let line = format!("DS18B20 Temperature: {}", text);
            assert_eq!(
                REFERENCE_TEMPERATURE.extract(&line).unwrap(),
                Some(vec![expected]),
                "literal {}",
                text
            );
        }
    }

    #[test]
    fn test_search_pattern_matches_anywhere() {
        let line = "[12:00] Thermistor Voltage: 1.1 (raw 1365)";
        assert_eq!(THERMISTOR_VOLTAGE.extract(line).unwrap(), Some(vec![1.1]));
        assert!(THERMISTOR_VOLTAGE.is_match(line));
        assert_eq!(THERMISTOR_VOLTAGE.name(), "thermistor voltage");
    }

    #[test]
    fn test_inf_is_not_a_match() {
        // printf renders a zero-voltage resistance as "inf"
        let line = "Thermistor Voltage: 0.0 V\tResistance: inf Ω";
        assert_eq!(VOLTAGE_RESISTANCE_PAIR.extract(line).unwrap(), None);
    }

    #[test]
    fn test_overflowing_literal_is_field_error() {
        let digits = "9".repeat(400);
        let line = format!("DS18B20 Temperature: {}", digits);
        let err = REFERENCE_TEMPERATURE.extract(&line).unwrap_err();
        assert_eq!(err.field, "reference_temp_c");
        assert_eq!(err.text, digits);
    }

    #[test]
    fn test_custom_pattern() {
        let pattern = LinePattern::new(
            "humidity",
            MatchRule::Search,
            r"RH:\s*{humidity_pct}\s*%",
            &["humidity_pct"],
        )
        .unwrap();
        assert_eq!(pattern.extract("RH: 45.5 %").unwrap(), Some(vec![45.5]));
        assert_eq!(pattern.extract("RH: n/a").unwrap(), None);
    }
}
