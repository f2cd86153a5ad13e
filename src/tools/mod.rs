//! 工具箱：Tool trait、注册表、参数 Schema 与默认工具
//! （灯光控制、记忆写入 / 检索、网络搜索、计时器、拍照）

pub mod camera;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod search;
pub mod smart_home;
pub mod timer;

pub use camera::CameraTool;
pub use memory::{RecallMemoryTool, StoreMemoryTool};
pub use registry::{Tool, ToolError, ToolRegistry};
pub use schema::{
    tool_selection_schema_json, validate_params, ParamType, ToolDescriptor, ToolParameter,
};
pub use search::{WebSearchTool, DEFAULT_SEARCH_ENDPOINT};
pub use smart_home::{LightState, SmartHomeTool};
pub use timer::TimerTool;
