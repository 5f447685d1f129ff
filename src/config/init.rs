// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates switchyard.yml and a starter nginx template.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{ImageRef, ServiceName};

use super::CONFIG_FILENAME;

const PROXY_TEMPLATE_FILENAME: &str = "nginx.conf.tmpl";

pub fn init_config(dir: &Path, service: Option<&str>, image: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let service = match service {
        Some(s) => ServiceName::new(s).map_err(|e| Error::InvalidConfig(e.to_string()))?,
        None => default_service_name(dir)?,
    };
    let image = match image {
        Some(i) => ImageRef::parse(i).map_err(|e| Error::InvalidConfig(e.to_string()))?,
        None => ImageRef::parse(service.as_str())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?,
    };

    std::fs::write(&config_path, generate_template_yaml(&service, &image))?;

    let template_path = dir.join(PROXY_TEMPLATE_FILENAME);
    if !template_path.exists() {
        std::fs::write(&template_path, PROXY_TEMPLATE)?;
    }

    Ok(())
}

/// Derive a service name from the directory name, falling back to `app`.
fn default_service_name(dir: &Path) -> Result<ServiceName> {
    let derived = dir
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()))
        .and_then(|name| ServiceName::new(&name).ok());
    match derived {
        Some(name) => Ok(name),
        None => ServiceName::new("app").map_err(|e| Error::InvalidConfig(e.to_string())),
    }
}

fn generate_template_yaml(service: &ServiceName, image: &ImageRef) -> String {
    format!(
        r#"service: {service}
image: {repository}

build:
  context: .
  dockerfile: Dockerfile

# Smoke test run in a throwaway container before deploying.
# test:
#   command: ["npm", "test"]
#   timeout: 5m

slots:
  host_ip: 127.0.0.1
  blue_port: 8081
  green_port: 8082
  container_port: 8080

health:
  path: /health
  interval: 5s
  timeout: 2m
  success_threshold: 1

proxy:
  config_path: /etc/nginx/conf.d/{service}.conf
  template: {template}
  public_url: http://127.0.0.1/health
  # slot_header: X-Switchyard-Slot

backup:
  paths: []
  retain_count: 5

# notify:
#   url:
#     env: SWITCHYARD_WEBHOOK_URL
#   extra:
#     chat_id: "123456"

environments:
  production: {{}}
"#,
        service = service,
        repository = image.repository(),
        template = PROXY_TEMPLATE_FILENAME,
    )
}

const PROXY_TEMPLATE: &str = r#"# {{service}} ({{environment}}) -> {{slot}} {{version}}
upstream {{service}}_{{environment}} {
    server {{upstream}};
}

server {
    listen 80;

    location / {
        proxy_pass http://{{service}}_{{environment}};
        add_header X-Switchyard-Slot {{slot}} always;
    }
}
"#;
