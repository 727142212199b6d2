use reply_core::config::LimitsConfig;
use reply_core::form::ConfigForm;

pub enum Notice {
    Success(String),
    Error(String),
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; max-width: 760px; margin: 2em auto; padding: 0 1em; }}
textarea, input[type=password] {{ width: 100%; box-sizing: border-box; }}
.notice-ok {{ color: #1a7f37; }}
.notice-err {{ color: #cf222e; }}
.hint {{ color: #666; font-size: 0.9em; }}
</style>
</head>
<body>
{body}
</body>
</html>"#,
        title = escape_html(title),
        body = body
    )
}

fn notice_html(notice: Option<&Notice>) -> String {
    match notice {
        Some(Notice::Success(msg)) => format!(r#"<p class="notice-ok">{}</p>"#, escape_html(msg)),
        Some(Notice::Error(msg)) => format!(r#"<p class="notice-err">{}</p>"#, escape_html(msg)),
        None => String::new(),
    }
}

fn max_length(limits: &LimitsConfig, max_chars: usize) -> String {
    if limits.enforce {
        format!(r#" maxlength="{max_chars}""#)
    } else {
        String::new()
    }
}

pub fn login_page(notice: Option<&Notice>) -> String {
    let body = format!(
        r#"<h1>🤖 机器人管理后台</h1>
{notice}
<form method="post" action="/admin/login">
<p><input type="password" name="password" placeholder="管理员密码" required autofocus></p>
<p><button type="submit">登录</button></p>
</form>"#,
        notice = notice_html(notice)
    );
    layout("管理后台登录", &body)
}

pub fn dashboard_page(
    form: &ConfigForm,
    backend: &str,
    persistent: bool,
    limits: &LimitsConfig,
    notice: Option<&Notice>,
) -> String {
    let storage = if persistent {
        format!("存储后端：{}", escape_html(backend))
    } else {
        format!("存储后端：{}（修改仅在当前进程有效）", escape_html(backend))
    };
    let body = format!(
        r#"<h1>🤖 机器人配置</h1>
<p class="hint">{storage} · <a href="/admin/logout">退出登录</a></p>
{notice}
<form method="post" action="/admin/save">
<h3>欢迎消息</h3>
<textarea name="welcomeMessage" rows="3"{welcome_max}>{welcome}</textarea>
<h3>默认回复</h3>
<textarea name="defaultReply" rows="3"{default_max}>{default_reply}</textarea>
<h3>关键词回复</h3>
<p class="hint">格式：关键词=回复内容;关键词2=回复内容2。回复中可用 [图片:链接]、[视频:链接]、[文件:链接]。</p>
<textarea name="keywords" rows="8"{keywords_max}>{keywords}</textarea>
<h3>按钮</h3>
<p class="hint">格式：按钮文字|链接;按钮文字2|链接2。留空则保留现有按钮。</p>
<textarea name="buttons" rows="4"{buttons_max}>{buttons}</textarea>
<p><button type="submit">保存配置</button></p>
</form>"#,
        storage = storage,
        notice = notice_html(notice),
        welcome_max = max_length(limits, limits.welcome_max_chars),
        welcome = escape_html(&form.welcome_message),
        default_max = max_length(limits, limits.default_reply_max_chars),
        default_reply = escape_html(&form.default_reply),
        keywords_max = max_length(limits, limits.keywords_max_chars),
        keywords = escape_html(&form.keywords),
        buttons_max = max_length(limits, limits.buttons_max_chars),
        buttons = escape_html(&form.buttons),
    );
    layout("机器人配置", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_covers_markup_chars() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn dashboard_escapes_config_values() {
        let form = ConfigForm {
            welcome_message: "</textarea><script>".to_string(),
            ..ConfigForm::default()
        };
        let html = dashboard_page(&form, "file", true, &LimitsConfig::default(), None);
        assert!(!html.contains("</textarea><script>"));
        assert!(html.contains("&lt;/textarea&gt;&lt;script&gt;"));
    }
}
