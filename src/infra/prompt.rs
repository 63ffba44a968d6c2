//! 交互式确认

use std::io::{self, BufRead, Write};

/// 询问 `question`，只有回答 `yes`（忽略大小写与首尾空白）才返回 `true`
///
/// 空输入、EOF 及其他任何回答都视为取消
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<bool> {
    write!(output, "{} [yes/no]: ", question)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}
