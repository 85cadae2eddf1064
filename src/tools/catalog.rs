//! 动作目录（v1）：名称、参数 schema、描述、是否破坏性、分类
//!
//! 参数结构体同时用于生成 prompt 里的 schema（schemars）与分发时的反序列化校验，两边不会出现偏差。

use std::collections::BTreeSet;

use schemars::schema::RootSchema;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::AgentError;

pub const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateFileParams {
    /// File path, relative to the workspace
    pub path: String,
    /// Initial file content
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PathParams {
    /// File path, relative to the workspace or absolute inside it
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AppParams {
    /// Application name, e.g. "calculator"
    pub app_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WindowOpName {
    Minimize,
    Maximize,
    Restore,
    Focus,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WindowOpParams {
    pub op: WindowOpName,
    /// Window title or application; the active window when omitted
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TypeTextParams {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PressKeysParams {
    /// Key combination, e.g. "ctrl+s"
    pub keys: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScreenshotParams {
    /// Where to save the image; a timestamped name in the workspace when omitted
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RunCodeParams {
    /// Python source code
    pub code: String,
    /// Wall-clock limit in seconds (1-300)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClearHistoryParams {
    /// Only forget turns older than this many days; everything when omitted
    #[serde(default)]
    pub older_than_days: Option<u32>,
}

/// 按动作名打标签的已校验请求
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", content = "parameters", rename_all = "snake_case")]
pub enum ActionRequest {
    Chat(NoParams),
    Help(NoParams),
    CreateFile(CreateFileParams),
    OpenFile(PathParams),
    DeleteFile(PathParams),
    LaunchApp(AppParams),
    CloseApp(AppParams),
    WindowOp(WindowOpParams),
    TypeText(TypeTextParams),
    PressKeys(PressKeysParams),
    TakeScreenshot(ScreenshotParams),
    RunCode(RunCodeParams),
    ClearHistory(ClearHistoryParams),
}

impl ActionRequest {
    /// 反序列化 + 非空检查；任何不符都是 InvalidParameters，协作方不会被调用
    pub fn parse(action: &str, parameters: &Map<String, Value>) -> Result<Self, AgentError> {
        let tagged = serde_json::json!({
            "action": action,
            "parameters": Value::Object(parameters.clone()),
        });
        let request: ActionRequest = serde_json::from_value(tagged)
            .map_err(|e| AgentError::invalid_parameters(action, e.to_string()))?;
        request.check_non_empty(action)?;
        Ok(request)
    }

    fn check_non_empty(&self, action: &str) -> Result<(), AgentError> {
        let required: &[(&str, &str)] = match self {
            ActionRequest::CreateFile(p) => &[("path", p.path.as_str())],
            ActionRequest::OpenFile(p) | ActionRequest::DeleteFile(p) => &[("path", p.path.as_str())],
            ActionRequest::LaunchApp(p) | ActionRequest::CloseApp(p) => {
                &[("app_name", p.app_name.as_str())]
            }
            ActionRequest::TypeText(p) => &[("text", p.text.as_str())],
            ActionRequest::PressKeys(p) => &[("keys", p.keys.as_str())],
            ActionRequest::RunCode(p) => &[("code", p.code.as_str())],
            _ => &[],
        };
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(AgentError::invalid_parameters(
                action,
                format!("`{field}` must not be empty"),
            )),
            None => Ok(()),
        }
    }
}

/// 目录条目
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub destructive: bool,
    pub category: &'static str,
    pub schema: RootSchema,
}

impl ActionSpec {
    fn new<P: JsonSchema>(
        name: &'static str,
        description: &'static str,
        category: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            destructive: false,
            category,
            schema: schema_for!(P),
        }
    }

    fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    /// (参数名, 是否必填)，必填在前
    pub fn parameters(&self) -> Vec<(String, bool)> {
        let Some(object) = self.schema.schema.object.as_ref() else {
            return Vec::new();
        };
        let required: &BTreeSet<String> = &object.required;
        let mut params: Vec<(String, bool)> = object
            .properties
            .keys()
            .map(|name| (name.clone(), required.contains(name)))
            .collect();
        params.sort_by_key(|(_, required)| !*required);
        params
    }

    /// 形如 `create_file(path, content?)`
    pub fn signature(&self) -> String {
        let params = self
            .parameters()
            .into_iter()
            .map(|(name, required)| if required { name } else { format!("{name}?") })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({params})", self.name)
    }
}

/// 静态、带版本的动作目录
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    specs: Vec<ActionSpec>,
}

impl ActionCatalog {
    pub fn v1() -> Self {
        let specs = vec![
            ActionSpec::new::<NoParams>(
                "chat",
                "Reply conversationally; nothing is executed",
                "Conversation",
            ),
            ActionSpec::new::<NoParams>(
                "help",
                "List what the assistant can do",
                "Conversation",
            ),
            ActionSpec::new::<CreateFileParams>(
                "create_file",
                "Create (or overwrite) a file in the workspace",
                "Files",
            ),
            ActionSpec::new::<PathParams>(
                "open_file",
                "Open a file with its default application",
                "Files",
            ),
            ActionSpec::new::<PathParams>(
                "delete_file",
                "Delete a file from the workspace",
                "Files",
            )
            .destructive(),
            ActionSpec::new::<AppParams>(
                "launch_app",
                "Start a desktop application",
                "Desktop",
            ),
            ActionSpec::new::<AppParams>(
                "close_app",
                "Close a running application",
                "Desktop",
            )
            .destructive(),
            ActionSpec::new::<WindowOpParams>(
                "window_op",
                "Minimize, maximize, restore or focus a window",
                "Desktop",
            ),
            ActionSpec::new::<TypeTextParams>(
                "type_text",
                "Type text into the focused window",
                "Desktop",
            ),
            ActionSpec::new::<PressKeysParams>(
                "press_keys",
                "Press a key or key combination",
                "Desktop",
            ),
            ActionSpec::new::<ScreenshotParams>(
                "take_screenshot",
                "Capture the screen to an image file",
                "Desktop",
            ),
            ActionSpec::new::<RunCodeParams>(
                "run_code",
                "Run Python code in an isolated sandbox and show output and variables",
                "Code",
            ),
            ActionSpec::new::<ClearHistoryParams>(
                "clear_history",
                "Forget the conversation history (all of it, or turns older than N days); files are kept",
                "Memory",
            )
            .destructive(),
        ];
        Self { specs }
    }

    pub fn version(&self) -> u32 {
        CATALOG_VERSION
    }

    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn specs(&self) -> &[ActionSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    /// 给推理服务的目录：每行 `- signature: description [destructive]`
    pub fn render_for_prompt(&self) -> String {
        self.specs
            .iter()
            .map(|s| {
                let flag = if s.destructive { " [destructive]" } else { "" };
                format!("- {}: {}{}", s.signature(), s.description, flag)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// help 动作的输出：按分类分组
    pub fn help_text(&self) -> String {
        let mut categories: Vec<&str> = Vec::new();
        for spec in &self.specs {
            if !categories.contains(&spec.category) {
                categories.push(spec.category);
            }
        }
        let mut out = String::from("Here is what I can do:\n");
        for category in categories {
            out.push_str(&format!("\n{category}:\n"));
            for spec in self.specs.iter().filter(|s| s.category == category) {
                out.push_str(&format!("  - {}: {}\n", spec.signature(), spec.description));
            }
        }
        out.push_str("\nDeleting files, closing applications and clearing history always ask for confirmation first.");
        out
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::v1()
    }
}
