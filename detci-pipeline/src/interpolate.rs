//! `${{ matrix.<key> }}` and `${{ env.<KEY> }}` substitution.
//!
//! Expressions are expanded at plan time. Plain shell references such as
//! `${CUDA_SHORT/./-}` are left untouched for the shell.

use crate::error::PlanError;
use detci_matrix::Assignment;
use std::collections::BTreeMap;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

/// Values visible to expressions.
pub struct Scope<'a> {
    pub matrix: &'a Assignment,
    pub env: &'a BTreeMap<String, String>,
}

impl<'a> Scope<'a> {
    pub fn new(matrix: &'a Assignment, env: &'a BTreeMap<String, String>) -> Self {
        Self { matrix, env }
    }

    fn lookup(&self, expression: &str) -> Result<&'a str, PlanError> {
        let fail = |reason: &str| PlanError::Interpolation {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let (namespace, key) = expression
            .split_once('.')
            .ok_or_else(|| fail("expected '<namespace>.<key>'"))?;

        match namespace {
            "matrix" => self
                .matrix
                .get(key)
                .ok_or_else(|| fail("no such matrix key")),
            "env" => self
                .env
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| fail("no such environment variable")),
            _ => Err(fail("unknown namespace")),
        }
    }
}

/// Expand every `${{ ... }}` expression in `template`.
pub fn interpolate(template: &str, scope: &Scope<'_>) -> Result<String, PlanError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or_else(|| PlanError::Interpolation {
                expression: rest[start..].to_string(),
                reason: "unterminated expression".to_string(),
            })?;
        let expression = after_open[..end].trim();
        out.push_str(scope.lookup(expression)?);
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Expand every value of a map.
pub fn interpolate_map(
    map: &BTreeMap<String, String>,
    scope: &Scope<'_>,
) -> Result<BTreeMap<String, String>, PlanError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), interpolate(v, scope)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (Assignment, BTreeMap<String, String>) {
        let mut matrix = Assignment::new();
        matrix.insert("python-version", "3.7");
        matrix.insert("torch", "1.5.0+cu101");
        let mut env = BTreeMap::new();
        env.insert("CUDA_ARCH".to_string(), "7.0".to_string());
        (matrix, env)
    }

    #[test]
    fn test_matrix_and_env_expressions() {
        let (matrix, env) = fixtures();
        let scope = Scope::new(&matrix, &env);
        assert_eq!(
            interpolate("pip install torch==${{ matrix.torch }}", &scope).unwrap(),
            "pip install torch==1.5.0+cu101"
        );
        assert_eq!(
            interpolate("TORCH_CUDA_ARCH_LIST=${{env.CUDA_ARCH}} python setup.py", &scope).unwrap(),
            "TORCH_CUDA_ARCH_LIST=7.0 python setup.py"
        );
    }

    #[test]
    fn test_shell_references_untouched() {
        let (matrix, env) = fixtures();
        let scope = Scope::new(&matrix, &env);
        let cmd = "sudo apt install -y cuda-${CUDA_SHORT/./-}";
        assert_eq!(interpolate(cmd, &scope).unwrap(), cmd);
    }

    #[test]
    fn test_unknown_key_and_unterminated() {
        let (matrix, env) = fixtures();
        let scope = Scope::new(&matrix, &env);
        assert!(matches!(
            interpolate("${{ matrix.mmcv }}", &scope),
            Err(PlanError::Interpolation { .. })
        ));
        assert!(matches!(
            interpolate("${{ secrets.TOKEN }}", &scope),
            Err(PlanError::Interpolation { .. })
        ));
        assert!(matches!(
            interpolate("echo ${{ matrix.torch", &scope),
            Err(PlanError::Interpolation { .. })
        ));
    }
}
