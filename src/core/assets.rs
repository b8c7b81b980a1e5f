//! Templates compiled into the binary for `reshelf init`.

macro_rules! embedded_templates {
    ($($name:expr => $const_name:ident),* $(,)?) => {
        $(
            pub const $const_name: &str = include_str!(concat!("../../templates/", $name));
        )*

        pub fn get_template(name: &str) -> Option<&'static str> {
            match name {
                $( $name => Some($const_name), )*
                _ => None,
            }
        }

        pub fn list_templates() -> Vec<&'static str> {
            vec![ $( $name, )* ]
        }
    };
}

embedded_templates! {
    "config.toml" => TEMPLATE_CONFIG,
    "schema.toml" => TEMPLATE_SCHEMA,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::schema::TargetSchema;

    #[test]
    fn templates_parse_as_valid_defaults() {
        let config = Config::parse(TEMPLATE_CONFIG).unwrap();
        assert_eq!(config, Config::default());
        let schema = TargetSchema::parse(TEMPLATE_SCHEMA).unwrap();
        assert!(schema.rule_for("").is_some());
        assert_eq!(list_templates(), vec!["config.toml", "schema.toml"]);
        assert!(get_template("missing.toml").is_none());
    }
}
