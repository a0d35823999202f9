use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStage {
    Preparing,
    Running,
    DiscoveringOutputs,
    Analysing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RunnerEvent {
    pub stage: RunnerStage,
    pub calculation: String,
    /// Analysis tool the event refers to.
    pub tool: Option<String>,
    pub message: Option<String>,
    pub elapsed_wall_s: f64,
}

impl RunnerEvent {
    pub fn stage(
        stage: RunnerStage,
        calculation: &str,
        elapsed_wall_s: f64,
        message: Option<String>,
    ) -> Self {
        Self {
            stage,
            calculation: calculation.to_string(),
            tool: None,
            message,
            elapsed_wall_s,
        }
    }

    /// One line for a log view.
    pub fn log_line(&self) -> String {
        let mut line = format!("[{:>7.1}s] {:?}", self.elapsed_wall_s, self.stage);
        if let Some(tool) = &self.tool {
            line.push_str(&format!(" ({})", tool));
        }
        if let Some(message) = &self.message {
            line.push_str(": ");
            line.push_str(message);
        }
        line
    }
}

pub(crate) type ProgressCallback<'a> = Option<&'a mut dyn FnMut(RunnerEvent)>;

pub(crate) fn emit_progress(
    progress_cb: &mut ProgressCallback<'_>,
    stage: RunnerStage,
    calculation: &str,
    tool: Option<&str>,
    started: Instant,
    message: impl Into<String>,
) {
    if let Some(cb) = progress_cb.as_deref_mut() {
        let mut event = RunnerEvent::stage(
            stage,
            calculation,
            started.elapsed().as_secs_f64(),
            Some(message.into()),
        );
        event.tool = tool.map(str::to_string);
        cb(event);
    }
}
