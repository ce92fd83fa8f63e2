use foundry_config::TelemetryConfig;
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource as semconv;

/// Build an OpenTelemetry Resource describing this Foundry instance
pub fn build_resource(config: &TelemetryConfig) -> Resource {
    let attributes = std::iter::once(KeyValue::new(semconv::SERVICE_NAME, config.service_name.clone()))
        .chain(std::iter::once(KeyValue::new(
            semconv::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        )))
        .chain(
            config
                .resource_attributes
                .iter()
                .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
        );

    Resource::builder().with_attributes(attributes).build()
}

#[cfg(test)]
mod tests {
    use opentelemetry::Key;

    use super::*;

    #[test]
    fn resource_carries_service_name_and_custom_attributes() {
        let mut config = TelemetryConfig {
            service_name: "foundry-staging".to_string(),
            ..TelemetryConfig::default()
        };
        config
            .resource_attributes
            .insert("deployment.environment".to_string(), "staging".to_string());

        let resource = build_resource(&config);

        assert_eq!(
            resource.get(&Key::from_static_str(semconv::SERVICE_NAME)).map(|v| v.to_string()),
            Some("foundry-staging".to_string())
        );
        assert_eq!(
            resource.get(&Key::from_static_str("deployment.environment")).map(|v| v.to_string()),
            Some("staging".to_string())
        );
    }
}
