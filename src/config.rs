use crate::error::ConfigError;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 区域校验使用的模型（为空时与 `llm_model_name` 相同）
    pub review_model_name: String,
    /// 采样温度（部分模型不支持，默认不传）
    pub llm_temperature: Option<f32>,
    /// 单次调用超时（秒）
    pub request_timeout_secs: u64,

    // --- 重试 / 校验 ---
    /// 传输类错误的最大尝试次数
    pub transport_max_attempts: u32,
    /// 每次重试输出上限的放大倍数
    pub size_growth_factor: f64,
    /// type1 试卷中小问标签的最低占比
    pub listing_min_match_ratio: f64,
    /// 区域修正最大迭代次数
    pub refinement_max_iterations: u32,
    /// 是否执行区域修正
    pub refine_regions: bool,
    /// 是否对缺失页码的题目补充标注
    pub reannotate_missing: bool,
    /// 分类时采样的页数
    pub classification_sample_pages: u32,

    // --- 输出上限（tokens）---
    pub classify_max_tokens: u32,
    pub listing_max_tokens: u32,
    pub annotation_max_tokens: u32,
    pub markup_max_tokens: u32,
    pub labelling_max_tokens: u32,
    pub review_max_tokens: u32,

    // --- 并发 ---
    /// 同时处理的任务数量
    pub max_concurrent_jobs: usize,
    /// 单个任务内同时处理的题目数量（0 表示不限制）
    pub max_concurrent_items: usize,

    // --- 文件 ---
    /// 任务 TOML 文件目录
    pub jobs_folder: String,
    /// 结果输出目录
    pub output_dir: String,
    /// 预渲染页面根目录
    pub pages_root: String,
    /// 分类体系文件
    pub taxonomy_file: String,
    /// 计价表文件（可选）
    pub pricing_file: Option<String>,
    /// 运行结束后是否删除已上传的文件
    pub auto_cleanup_files: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            review_model_name: String::new(),
            llm_temperature: None,
            request_timeout_secs: 300,
            transport_max_attempts: 2,
            size_growth_factor: 1.5,
            listing_min_match_ratio: 0.2,
            refinement_max_iterations: 4,
            refine_regions: true,
            reannotate_missing: false,
            classification_sample_pages: 3,
            classify_max_tokens: 2000,
            listing_max_tokens: 4000,
            annotation_max_tokens: 16000,
            markup_max_tokens: 8000,
            labelling_max_tokens: 3000,
            review_max_tokens: 1000,
            max_concurrent_jobs: 4,
            max_concurrent_items: 0,
            jobs_folder: "jobs".to_string(),
            output_dir: "output".to_string(),
            pages_root: "pages".to_string(),
            taxonomy_file: "taxonomy.toml".to_string(),
            pricing_file: None,
            auto_cleanup_files: true,
            verbose_logging: false,
        }
    }
}

/// 读取并解析环境变量，缺失或无法解析时使用默认值
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            review_model_name: std::env::var("REVIEW_MODEL_NAME").unwrap_or(default.review_model_name),
            llm_temperature: std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", default.request_timeout_secs),
            transport_max_attempts: env_or("TRANSPORT_MAX_ATTEMPTS", default.transport_max_attempts),
            size_growth_factor: env_or("SIZE_GROWTH_FACTOR", default.size_growth_factor),
            listing_min_match_ratio: env_or("LISTING_MIN_MATCH_RATIO", default.listing_min_match_ratio),
            refinement_max_iterations: env_or("REFINEMENT_MAX_ITERATIONS", default.refinement_max_iterations),
            refine_regions: env_or("REFINE_REGIONS", default.refine_regions),
            reannotate_missing: env_or("REANNOTATE_MISSING", default.reannotate_missing),
            classification_sample_pages: env_or("CLASSIFICATION_SAMPLE_PAGES", default.classification_sample_pages),
            classify_max_tokens: env_or("CLASSIFY_MAX_TOKENS", default.classify_max_tokens),
            listing_max_tokens: env_or("LISTING_MAX_TOKENS", default.listing_max_tokens),
            annotation_max_tokens: env_or("ANNOTATION_MAX_TOKENS", default.annotation_max_tokens),
            markup_max_tokens: env_or("MARKUP_MAX_TOKENS", default.markup_max_tokens),
            labelling_max_tokens: env_or("LABELLING_MAX_TOKENS", default.labelling_max_tokens),
            review_max_tokens: env_or("REVIEW_MAX_TOKENS", default.review_max_tokens),
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", default.max_concurrent_jobs),
            max_concurrent_items: env_or("MAX_CONCURRENT_ITEMS", default.max_concurrent_items),
            jobs_folder: std::env::var("JOBS_FOLDER").unwrap_or(default.jobs_folder),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(default.output_dir),
            pages_root: std::env::var("PAGES_ROOT").unwrap_or(default.pages_root),
            taxonomy_file: std::env::var("TAXONOMY_FILE").unwrap_or(default.taxonomy_file),
            pricing_file: std::env::var("PRICING_FILE").ok().or(default.pricing_file),
            auto_cleanup_files: env_or("AUTO_CLEANUP_FILES", default.auto_cleanup_files),
            verbose_logging: env_or("VERBOSE_LOGGING", default.verbose_logging),
        }
    }

    /// 区域校验实际使用的模型
    pub fn effective_review_model(&self) -> &str {
        if self.review_model_name.is_empty() {
            &self.llm_model_name
        } else {
            &self.review_model_name
        }
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm_api_key.trim().is_empty() {
            return Err(ConfigError::Missing("LLM_API_KEY".to_string()));
        }
        if self.llm_model_name.trim().is_empty() {
            return Err(ConfigError::Missing("LLM_MODEL_NAME".to_string()));
        }
        if self.transport_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "TRANSPORT_MAX_ATTEMPTS".to_string(),
                reason: "至少需要 1 次尝试".to_string(),
            });
        }
        if self.size_growth_factor < 1.0 {
            return Err(ConfigError::Invalid {
                name: "SIZE_GROWTH_FACTOR".to_string(),
                reason: format!("放大倍数 {} 不能小于 1", self.size_growth_factor),
            });
        }
        if !(0.0..=1.0).contains(&self.listing_min_match_ratio) {
            return Err(ConfigError::Invalid {
                name: "LISTING_MIN_MATCH_RATIO".to_string(),
                reason: format!("占比 {} 必须在 [0, 1] 之间", self.listing_min_match_ratio),
            });
        }
        if self.refinement_max_iterations == 0 {
            return Err(ConfigError::Invalid {
                name: "REFINEMENT_MAX_ITERATIONS".to_string(),
                reason: "至少需要 1 次迭代".to_string(),
            });
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_CONCURRENT_JOBS".to_string(),
                reason: "并发数不能为 0".to_string(),
            });
        }
        Ok(())
    }
}
