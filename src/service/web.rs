//! Static web server backed by nginx.

use super::Server;
use crate::model::Node;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebServer {
    port: u16,
    index: Option<String>,
}

impl Default for WebServer {
    fn default() -> Self {
        WebServer { port: 80, index: None }
    }
}

impl WebServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    /// Replace the generated index page.
    pub fn set_index_content(&mut self, content: &str) -> &mut Self {
        self.index = Some(content.to_string());
        self
    }

    fn site_config(&self) -> String {
        format!(
            "server {{\n    listen {port};\n    root /var/www/html;\n    index index.html;\n    server_name _;\n}}\n",
            port = self.port
        )
    }
}

impl Server for WebServer {
    const SERVICE_NAME: &'static str = "WebService";

    fn install(&self, node: &mut Node, vnode: &str) {
        let index = self
            .index
            .clone()
            .unwrap_or_else(|| format!("<h1>{} is running on {}</h1>\n", vnode, node.name));
        node.add_software("nginx-light")
            .set_file("/var/www/html/index.html", index)
            .set_file("/etc/nginx/sites-available/default", self.site_config())
            .add_start_command("service nginx start", false);
        log::debug!("Installed web server for '{}' on {} (port {})", vnode, node.key(), self.port);
    }
}
