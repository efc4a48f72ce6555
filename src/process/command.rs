//! 待执行命令：程序、参数、工作目录、环境变量

use std::fmt;
use std::path::PathBuf;

use crate::core::VcError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 由一整行命令解析（支持单/双引号）
    pub fn parse(command_line: &str) -> Result<Self, VcError> {
        let mut parts = split_command_line(command_line)?.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| VcError::invalid_config("command line is empty"))?;
        Ok(Self::new(program).args(parts))
    }

    /// 程序文件名（不含目录），用于判断是否已是 sudo 等包装器
    pub fn program_name(&self) -> &str {
        self.program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.program)
    }

    /// 在最前面插入包装程序：`wrapper wrapper_args... program args...`
    pub fn wrapped(self, wrapper: impl Into<String>, wrapper_args: Vec<String>) -> Self {
        let mut args = wrapper_args;
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: wrapper.into(),
            args,
            working_dir: self.working_dir,
            env: self.env,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() || s.contains(char::is_whitespace) {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

/// 按空白切分，引号内空白保留；未闭合的引号视为配置错误
pub fn split_command_line(raw: &str) -> Result<Vec<String>, VcError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    parts.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        return Err(VcError::invalid_config(format!(
            "unbalanced quotes in command line '{raw}'"
        )));
    }
    if in_token {
        parts.push(current);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_quotes() {
        assert_eq!(
            split_command_line(r#"fio --name "rand read" --size='1 GB' -x"#).unwrap(),
            vec!["fio", "--name", "rand read", "--size=1 GB", "-x"]
        );
        assert_eq!(split_command_line(r#"echo """#).unwrap(), vec!["echo", ""]);
        assert!(split_command_line("echo \"open").is_err());
    }

    #[test]
    fn test_parse_and_wrap() {
        let spec = CommandSpec::parse("/usr/bin/redis-server --port 6379")
            .unwrap()
            .working_dir("/tmp");
        assert_eq!(spec.program_name(), "redis-server");

        let wrapped = spec.wrapped("sudo", vec![]);
        assert_eq!(wrapped.program, "sudo");
        assert_eq!(wrapped.args, vec!["/usr/bin/redis-server", "--port", "6379"]);
        assert_eq!(wrapped.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(wrapped.to_string(), "sudo /usr/bin/redis-server --port 6379");
    }

    #[test]
    fn test_empty_command_line_is_rejected() {
        assert!(CommandSpec::parse("   ").is_err());
    }
}
